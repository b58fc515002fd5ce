//! `hlv create` — Create a swap on a running node.

use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use hlv_core::SwapDirection;
use hlv_engine::{Counterparty, CreateSwapRequest, SwapReceipt};

use super::{decode, DEFAULT_ENDPOINT};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Direction {
    /// Lock on chain, receive over the payment network.
    ChainToPayment,
    /// Pay over the payment network, receive on chain.
    PaymentToChain,
}

impl From<Direction> for SwapDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::ChainToPayment => SwapDirection::ChainToPayment,
            Direction::PaymentToChain => SwapDirection::PaymentToChain,
        }
    }
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(short, long, value_enum)]
    pub direction: Direction,

    /// Amount on the payment leg, in satoshis.
    #[arg(short, long)]
    pub amount: i128,

    /// Address of the requesting user.
    #[arg(short, long)]
    pub user: String,

    /// Invoice to pay (chain-to-payment swaps).
    #[arg(long, conflicts_with = "address")]
    pub invoice: Option<String>,

    /// Chain address receiving the HTLC (payment-to-chain swaps).
    #[arg(long, required_unless_present = "invoice")]
    pub address: Option<String>,

    /// Absolute HTLC expiry (RFC 3339). Defaults to the node's policy.
    #[arg(long)]
    pub timelock: Option<DateTime<Utc>>,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

pub async fn run(args: &CreateArgs) -> anyhow::Result<()> {
    let counterparty = match (&args.invoice, &args.address) {
        (Some(invoice), _) => Counterparty::Invoice(invoice.clone()),
        (None, Some(address)) => Counterparty::Address(address.clone()),
        (None, None) => anyhow::bail!("either --invoice or --address is required"),
    };
    let body = CreateSwapRequest {
        direction: args.direction.into(),
        counterparty,
        amount: args.amount,
        user_address: args.user.clone(),
        timelock: args.timelock,
    };

    println!("Creating swap...");
    println!("  Direction: {}", body.direction);
    println!("  Amount:    {} sats", args.amount);
    println!("  Via:       {}", args.endpoint);
    println!();

    let url = format!("{}/api/v1/swaps", args.endpoint);
    let resp = reqwest::Client::new().post(&url).json(&body).send().await;
    let receipt: SwapReceipt = decode(resp, &args.endpoint, "create").await?;

    println!("Swap created!");
    println!("  Swap ID:   {}", receipt.swap_id);
    println!("  Status:    {}", receipt.status);
    Ok(())
}
