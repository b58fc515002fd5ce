use crate::job::{JobId, JobKey};

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The job is missing, not yet due, or its swap is leased by another worker.
    #[error("not available: {0}")]
    NotAvailable(JobKey),

    #[error("concurrency ceiling of {0} active leases reached")]
    AtCapacity(usize),

    /// The lease lapsed or was superseded; the holder must stop writing.
    #[error("lease on job {0} is no longer held")]
    LeaseLost(JobId),

    #[error("job not found: {0}")]
    UnknownJob(JobId),

    #[error("job journal error: {0}")]
    Journal(String),

    #[error("invalid scheduler configuration: {0}")]
    Config(String),
}
