//! `hlv rebalance` — Move part of a chain balance onto the payment network.

use clap::Args;
use hlv_engine::{RebalanceRequest, SwapReceipt};

use super::{decode, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct RebalanceArgs {
    /// Address of the user whose balance is rebalanced.
    #[arg(short, long)]
    pub user: String,

    /// Current chain balance, in wei.
    #[arg(short, long)]
    pub balance: i128,

    /// Payment-network wallet credential. Sent once, never stored.
    #[arg(long)]
    pub credential: String,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

pub async fn run(args: &RebalanceArgs) -> anyhow::Result<()> {
    let body = RebalanceRequest {
        user_address: args.user.clone(),
        source_balance: args.balance,
        credential: args.credential.clone(),
    };

    let url = format!("{}/api/v1/rebalance", args.endpoint);
    let resp = reqwest::Client::new().post(&url).json(&body).send().await;
    let receipt: SwapReceipt = decode(resp, &args.endpoint, "rebalance").await?;

    println!("Rebalance swap created!");
    println!("  Swap ID:   {}", receipt.swap_id);
    println!("  Status:    {}", receipt.status);
    Ok(())
}
