//! `hlv get` — Show a single swap.

use clap::Args;
use hlv_core::SwapId;
use hlv_engine::SwapView;

use super::{decode, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Swap identifier.
    pub swap_id: SwapId,

    /// Print the raw JSON record.
    #[arg(long)]
    pub json: bool,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

pub async fn run(args: &GetArgs) -> anyhow::Result<()> {
    let url = format!("{}/api/v1/swaps/{}", args.endpoint, args.swap_id);
    let swap: SwapView = decode(reqwest::get(&url).await, &args.endpoint, "get").await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&swap)?);
        return Ok(());
    }

    println!("Swap {}", swap.swap_id);
    println!("  Direction:     {}", swap.direction);
    println!("  Status:        {}", swap.status);
    println!("  Payment:       {} sats", swap.payment_amount);
    println!("  HTLC:          {} wei -> {}", swap.htlc_amount, swap.htlc_recipient);
    println!("  Timelock:      {}", swap.timelock.to_rfc3339());
    if let Some(hash) = &swap.payment_hash {
        println!("  Payment hash:  {}", hash);
    }
    if let Some(tx) = &swap.htlc_tx_hash {
        println!("  Lock tx:       {} ({} confs)", tx, swap.htlc_confirmations);
    }
    if let Some(tx) = &swap.claim_tx_hash {
        println!("  Claim tx:      {} ({} confs)", tx, swap.claim_confirmations);
    }
    if let Some(tx) = &swap.refund_tx_hash {
        println!("  Refund tx:     {}", tx);
    }
    if let Some(err) = &swap.last_error {
        println!("  Last error:    {}", err);
    }
    Ok(())
}
