//! HLV CLI — command-line client for a running HLV swap node.
//!
//! Subcommands: status, create, get, list, history, cancel, rebalance.

mod commands;

use clap::{Parser, Subcommand};

/// HLV — atomic swaps between a payment network and an HTLC chain.
#[derive(Parser, Debug)]
#[command(name = "hlv", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Query the status of a running node.
    Status(commands::status::StatusArgs),
    /// Create a new swap.
    Create(commands::create::CreateArgs),
    /// Show a single swap.
    Get(commands::get::GetArgs),
    /// List swaps, newest first.
    List(commands::list::ListArgs),
    /// Show the transition history of a swap.
    History(commands::history::HistoryArgs),
    /// Cancel a pending swap.
    Cancel(commands::cancel::CancelArgs),
    /// Move part of a chain balance onto the payment network.
    Rebalance(commands::rebalance::RebalanceArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Status(args) => commands::status::run(args).await,
        Commands::Create(args) => commands::create::run(args).await,
        Commands::Get(args) => commands::get::run(args).await,
        Commands::List(args) => commands::list::run(args).await,
        Commands::History(args) => commands::history::run(args).await,
        Commands::Cancel(args) => commands::cancel::run(args).await,
        Commands::Rebalance(args) => commands::rebalance::run(args).await,
    }
}
