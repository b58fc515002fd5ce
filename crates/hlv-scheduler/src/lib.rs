//! HLV Scheduler
//!
//! At-least-once, single-flight execution of swap steps. Jobs are leased
//! per swap, retried with exponential backoff, dead-lettered after a bounded
//! number of attempts, and journaled so queued work survives a restart.
//! Recurring scans are periodic enqueues read off an injected clock.

pub mod backoff;
pub mod config;
pub mod error;
pub mod job;
pub mod journal;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use job::{
    Job, JobId, JobKey, JobPayload, JobScope, JobState, Lease, Priority, ScanKind,
    SwapCommand,
};
pub use journal::{IJobJournal, MemoryJournal};
pub use scheduler::{RetryOutcome, Scheduler, SchedulerStats};
