//! Job model: keys, payloads, priorities and leases.

use chrono::{DateTime, Utc};
use hlv_core::{SwapId, SwapStep, WatchEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deduplication key. At most one live job exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey(String);

impl JobKey {
    pub fn step(swap_id: SwapId, step: SwapStep) -> Self {
        Self(format!("swap/{}/step/{}", swap_id, step))
    }

    pub fn event(swap_id: SwapId, event: &WatchEvent) -> Self {
        Self(format!("swap/{}/event/{}", swap_id, event.name()))
    }

    pub fn scan(kind: ScanKind) -> Self {
        Self(format!("scan/{}", kind.as_str()))
    }

    pub fn for_payload(payload: &JobPayload) -> Self {
        match payload {
            JobPayload::Step { swap_id, step } => Self::step(*swap_id, *step),
            JobPayload::Event { swap_id, event } => Self::event(*swap_id, event),
            JobPayload::Command { swap_id, command } => Self::command(*swap_id, *command),
            JobPayload::Scan { kind } => Self::scan(*kind),
        }
    }

    pub fn command(swap_id: SwapId, command: SwapCommand) -> Self {
        Self(format!("swap/{}/command/{}", swap_id, command.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit of mutual exclusion. Every job touching one swap shares a scope, so
/// no two steps of the same swap run at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum JobScope {
    Swap(SwapId),
    Scan(ScanKind),
}

impl fmt::Display for JobScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swap(id) => write!(f, "swap/{}", id),
            Self::Scan(kind) => write!(f, "scan/{}", kind.as_str()),
        }
    }
}

/// Recurring sweeps over the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// Poll chain and payment network for every non-terminal swap.
    WatchChain,
    /// Look for swaps whose timelock has passed.
    TimelockSweep,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WatchChain => "watch_chain",
            Self::TimelockSweep => "timelock_sweep",
        }
    }
}

/// Externally requested change to a swap, serialized with its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapCommand {
    Cancel,
}

impl SwapCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
        }
    }
}

/// What a job asks a worker to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Step { swap_id: SwapId, step: SwapStep },
    Event { swap_id: SwapId, event: WatchEvent },
    Command { swap_id: SwapId, command: SwapCommand },
    Scan { kind: ScanKind },
}

impl JobPayload {
    pub fn scope(&self) -> JobScope {
        match self {
            Self::Step { swap_id, .. }
            | Self::Event { swap_id, .. }
            | Self::Command { swap_id, .. } => JobScope::Swap(*swap_id),
            Self::Scan { kind } => JobScope::Scan(*kind),
        }
    }

    pub fn swap_id(&self) -> Option<SwapId> {
        match self {
            Self::Step { swap_id, .. }
            | Self::Event { swap_id, .. }
            | Self::Command { swap_id, .. } => Some(*swap_id),
            Self::Scan { .. } => None,
        }
    }

    /// Dispatch priority: timelock races first, routine monitoring last.
    pub fn default_priority(&self) -> Priority {
        match self {
            Self::Step { step, .. } if step.is_safety_critical() => Priority::Critical,
            Self::Step { .. } => Priority::High,
            Self::Event {
                event: WatchEvent::TimelockElapsed,
                ..
            } => Priority::Critical,
            Self::Event { .. } => Priority::Normal,
            Self::Command { .. } => Priority::High,
            Self::Scan {
                kind: ScanKind::TimelockSweep,
            } => Priority::High,
            Self::Scan {
                kind: ScanKind::WatchChain,
            } => Priority::Low,
        }
    }
}

/// Dispatch priority; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Lifecycle of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Leased {
        owner: String,
        token: Uuid,
        expires_at: DateTime<Utc>,
    },
    /// Gave up after exhausting its attempts.
    Dead { reason: String },
}

/// A scheduled job, as journaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub key: JobKey,
    pub payload: JobPayload,
    pub priority: Priority,
    pub state: JobState,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    /// Earliest instant the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload, priority: Priority, run_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            key: JobKey::for_payload(&payload),
            payload,
            priority,
            state: JobState::Queued,
            attempts: 0,
            run_at,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope(&self) -> JobScope {
        self.payload.scope()
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.state, JobState::Dead { .. })
    }

    /// Whether a lease on this job is in force at `now`.
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Leased { expires_at, .. } if expires_at > now)
    }

    /// Whether a worker may claim this job at `now`.
    ///
    /// A job whose lease lapsed is claimable again.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        match &self.state {
            JobState::Queued => self.run_at <= now,
            JobState::Leased { expires_at, .. } => *expires_at <= now,
            JobState::Dead { .. } => false,
        }
    }
}

/// Ownership grant over one job, and through it over the job's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub key: JobKey,
    pub payload: JobPayload,
    pub owner: String,
    pub token: Uuid,
    /// 1-based attempt number of this claim.
    pub attempt: u32,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn scope(&self) -> JobScope {
        self.payload.scope()
    }
}

/// A recurring enqueue, re-registered on every start.
#[derive(Debug, Clone)]
pub struct PeriodicJob {
    pub payload: JobPayload,
    pub every: chrono::Duration,
    pub next_at: DateTime<Utc>,
}
