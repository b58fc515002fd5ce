use chrono::{DateTime, Utc};
use hlv_core::{Clock, Swap, SwapId, SwapPolicy, SwapStep, WatchEvent};
use hlv_ledger::ISwapLedger;
use hlv_providers::Capabilities;
use hlv_scheduler::{JobId, JobPayload, Scheduler};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::EngineError;

/// Collaborators injected into the engine, watcher, service and worker.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct SwapContext {
    pub ledger: Arc<dyn ISwapLedger>,
    pub capabilities: Capabilities,
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub policy: Arc<SwapPolicy>,
    /// Wakes the worker loop when new work is enqueued.
    pub notify: Arc<Notify>,
}

impl SwapContext {
    pub fn new(
        ledger: Arc<dyn ISwapLedger>,
        capabilities: Capabilities,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
        policy: SwapPolicy,
    ) -> Self {
        Self {
            ledger,
            capabilities,
            scheduler,
            clock,
            policy: Arc::new(policy),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn enqueue(&self, payload: JobPayload) -> Result<JobId, EngineError> {
        let id = self.scheduler.enqueue(payload)?;
        self.notify.notify_one();
        Ok(id)
    }

    pub fn enqueue_step(&self, swap_id: SwapId, step: SwapStep) -> Result<JobId, EngineError> {
        self.enqueue(JobPayload::Step { swap_id, step })
    }

    pub fn enqueue_event(&self, swap_id: SwapId, event: WatchEvent) -> Result<JobId, EngineError> {
        self.enqueue(JobPayload::Event { swap_id, event })
    }

    /// Compare-and-set `prior` to `next`, logging the transition.
    pub async fn commit(&self, prior: &Swap, next: Swap) -> Result<Swap, EngineError> {
        let stored = self.ledger.compare_and_set(prior, next).await?;
        if stored.status != prior.status {
            tracing::info!(
                swap_id = %stored.swap_id,
                from = %prior.status,
                to = %stored.status,
                version = stored.version,
                "swap transitioned"
            );
        }
        Ok(stored)
    }

    /// Drive `swap` to `Failed` with `reason` as its last error.
    pub async fn fail_swap(&self, swap: &Swap, reason: impl Into<String>) -> Result<Swap, EngineError> {
        let reason = reason.into();
        tracing::error!(swap_id = %swap.swap_id, status = %swap.status, reason = %reason, "swap failed");
        let next = swap.fail(reason, self.now())?;
        self.commit(swap, next).await
    }

    /// Record `reason` on a swap without changing its status.
    pub async fn annotate(&self, swap: &Swap, reason: impl Into<String>) -> Result<Swap, EngineError> {
        let reason = reason.into();
        if swap.last_error.as_deref() == Some(reason.as_str()) {
            return Ok(swap.clone());
        }
        let next = swap.annotate(reason, self.now())?;
        self.commit(swap, next).await
    }
}

impl std::fmt::Debug for SwapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapContext")
            .field("capabilities", &self.capabilities)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
