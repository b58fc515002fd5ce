//! `hlv list` — List swaps, newest first.

use clap::Args;
use hlv_core::SwapStatus;
use hlv_engine::SwapView;

use super::{decode, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only swaps requested by this user address.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Only swaps in these statuses.
    #[arg(short, long, value_delimiter = ',')]
    pub status: Vec<SwapStatus>,

    /// Maximum number of swaps.
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

pub async fn run(args: &ListArgs) -> anyhow::Result<()> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(user) = &args.user {
        query.push(("user", user.clone()));
    }
    if !args.status.is_empty() {
        let statuses: Vec<&str> = args.status.iter().map(|s| s.as_str()).collect();
        query.push(("status", statuses.join(",")));
    }
    if let Some(limit) = args.limit {
        query.push(("limit", limit.to_string()));
    }

    let url = format!("{}/api/v1/swaps", args.endpoint);
    let resp = reqwest::Client::new().get(&url).query(&query).send().await;
    let swaps: Vec<SwapView> = decode(resp, &args.endpoint, "list").await?;

    if swaps.is_empty() {
        println!("No swaps.");
        return Ok(());
    }
    println!("{:<38} {:<18} {:<20} {:>12}  {}", "SWAP ID", "DIRECTION", "STATUS", "SATS", "CREATED");
    for swap in &swaps {
        println!(
            "{:<38} {:<18} {:<20} {:>12}  {}",
            swap.swap_id.to_string(),
            swap.direction.to_string(),
            swap.status.to_string(),
            swap.payment_amount,
            swap.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!();
    println!("{} swap(s)", swaps.len());
    Ok(())
}
