//! HLV Swap Ledger
//!
//! The single source of truth for swap records. All writers go through
//! compare-and-set so that a stale reader can never overwrite a newer state.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use traits::{prepare_successor, ISwapLedger};
pub use types::{SwapFilter, TransitionRecord};
