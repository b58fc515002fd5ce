//! HLV Node
//!
//! Deployment shell around the swap engine: TOML configuration, RocksDB
//! persistence for the ledger and the job journal, the HTTP API, and the
//! wiring that runs them together.

pub mod api;
pub mod config;
pub mod journal;
pub mod ledger;
pub mod node;
pub mod storage;

pub use config::HlvConfig;
pub use node::HlvNode;
