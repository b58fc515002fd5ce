use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a claim is held before another worker may take the job over.
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: i64,
    /// Ceiling on simultaneously leased jobs.
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
    /// Claims per job before it is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Idle sleep of the dispatch loop when nothing is due.
    #[serde(default = "default_process_every_ms")]
    pub process_every_ms: u64,
}

fn default_lease_duration_secs() -> i64 {
    60
}
fn default_max_concurrent_steps() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    300_000
}
fn default_process_every_ms() -> u64 {
    10_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: default_lease_duration_secs(),
            max_concurrent_steps: default_max_concurrent_steps(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            process_every_ms: default_process_every_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::seconds(self.lease_duration_secs)
    }

    pub fn process_every(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.process_every_ms)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.lease_duration_secs <= 0 {
            return Err(SchedulerError::Config(
                "lease_duration_secs must be positive".into(),
            ));
        }
        if self.max_concurrent_steps == 0 {
            return Err(SchedulerError::Config(
                "max_concurrent_steps must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SchedulerError::Config("max_attempts must be at least 1".into()));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(SchedulerError::Config(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }
}
