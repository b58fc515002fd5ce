//! `hlv history` — Show the transition log of a swap.

use clap::Args;
use hlv_core::SwapId;
use hlv_ledger::TransitionRecord;

use super::{decode, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Swap identifier.
    pub swap_id: SwapId,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

pub async fn run(args: &HistoryArgs) -> anyhow::Result<()> {
    let url = format!("{}/api/v1/swaps/{}/transitions", args.endpoint, args.swap_id);
    let log: Vec<TransitionRecord> = decode(reqwest::get(&url).await, &args.endpoint, "history").await?;

    println!("Swap {}", args.swap_id);
    for record in &log {
        let from = record.from.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        print!(
            "  #{:<3} {}  {:>20} -> {:<20}",
            record.sequence,
            record.at.format("%Y-%m-%d %H:%M:%S"),
            from,
            record.to.to_string(),
        );
        match &record.note {
            Some(note) => println!(" {}", note),
            None => println!(),
        }
    }
    Ok(())
}
