//! HLV Engine
//!
//! The swap state machine and everything that drives it: an idempotent step
//! executor with precheck/execute/reconcile phases, a read-only chain
//! watcher, the inbound swap service, and the worker loop that runs queued
//! jobs under single-flight leases.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
mod executor;
pub mod service;
pub mod watcher;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use config::{AgentConfig, WatcherConfig};
pub use context::SwapContext;
pub use engine::{StepOutcome, SwapEngine};
pub use error::{EngineError, ErrorClass};
pub use events::TIMELOCK_ELAPSED_BEFORE_LOCK;
pub use service::{
    Counterparty, CreateSwapRequest, RebalanceRequest, SwapReceipt, SwapService, SwapView,
    DEFAULT_LIST_LIMIT,
};
pub use watcher::{next_step, ChainWatcher, WatchReport};
pub use worker::Worker;
