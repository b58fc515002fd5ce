//! HLV Node — entry point.
//!
//! Starts the swap node with configuration from a TOML file or defaults.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use hlv_node::config::LoggingConfig;
use hlv_node::{HlvConfig, HlvNode};

/// HLV swap node
#[derive(Parser, Debug)]
#[command(name = "hlv-node", version, about = "HLV atomic swap node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "hlv.toml")]
    config: PathBuf,

    /// Override the API port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep all state in memory.
    #[arg(long)]
    in_memory: bool,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the log format (text, json).
    #[arg(long)]
    log_format: Option<String>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        let config = HlvConfig::default();
        config.save(&args.config)?;
        println!("wrote default config to {}", args.config.display());
        return Ok(());
    }

    // Load configuration
    let mut config = HlvConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(ref data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if args.in_memory {
        config.storage.in_memory = true;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);
    tracing::info!("HLV Node v{}", env!("CARGO_PKG_VERSION"));

    // Create and start the node
    let mut node = HlvNode::new(config)?;
    let api_addr = node.start().await?;
    tracing::info!(%api_addr, "node running");

    // Set up graceful shutdown on SIGINT
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("received shutdown signal");

    node.shutdown().await?;
    tracing::info!("HLV node exited cleanly");
    Ok(())
}
