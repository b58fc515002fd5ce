//! `hlv status` — Query the status of a running HLV node.

use clap::Args;
use serde::Deserialize;

use super::{decode, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    jobs_queued: usize,
    jobs_leased: usize,
    jobs_dead: usize,
}

pub async fn run(args: &StatusArgs) -> anyhow::Result<()> {
    let url = format!("{}/api/v1/status", args.endpoint);
    let data: StatusResponse = decode(reqwest::get(&url).await, &args.endpoint, "status").await?;

    println!("Node Status:");
    println!("  Endpoint: {}", args.endpoint);
    println!("  Version:  {}", data.version);
    println!("  Uptime:   {}s", data.uptime_secs);
    println!("  Jobs:     {} queued, {} leased, {} dead", data.jobs_queued, data.jobs_leased, data.jobs_dead);
    Ok(())
}
