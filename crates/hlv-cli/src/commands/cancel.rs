//! `hlv cancel` — Cancel a pending swap.

use clap::Args;
use hlv_core::SwapId;
use hlv_engine::SwapReceipt;

use super::{decode, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Swap identifier.
    pub swap_id: SwapId,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

pub async fn run(args: &CancelArgs) -> anyhow::Result<()> {
    let url = format!("{}/api/v1/swaps/{}/cancel", args.endpoint, args.swap_id);
    let resp = reqwest::Client::new().post(&url).send().await;
    let receipt: SwapReceipt = decode(resp, &args.endpoint, "cancel").await?;

    println!("Swap {} is now {}", receipt.swap_id, receipt.status);
    Ok(())
}
