//! Scheduler-driven worker loop.
//!
//! Claims due jobs, dispatches them to the engine or the watcher, and maps
//! each [`StepOutcome`] back onto the scheduler. A lease is renewed while its
//! job runs; a job whose outcome is unknown keeps its lease until it lapses,
//! so the next claim reconciles first.

use hlv_scheduler::{JobPayload, Lease, RetryOutcome, ScanKind, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::WatcherConfig;
use crate::engine::{StepOutcome, SwapEngine};
use crate::error::EngineError;
use crate::watcher::ChainWatcher;

pub struct Worker {
    engine: SwapEngine,
    watcher: ChainWatcher,
    id: String,
}

impl Worker {
    pub fn new(engine: SwapEngine, watcher_config: WatcherConfig, id: impl Into<String>) -> Self {
        let watcher = ChainWatcher::new(engine.context().clone(), watcher_config);
        Self {
            engine,
            watcher,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn scheduler(&self) -> &Scheduler {
        &self.engine.context().scheduler
    }

    /// Register the recurring chain poll and timelock sweep.
    pub fn register_periodic(&self) {
        let config = self.watcher.config();
        self.scheduler().register_periodic(
            JobPayload::Scan {
                kind: ScanKind::WatchChain,
            },
            config.poll_interval(),
        );
        self.scheduler().register_periodic(
            JobPayload::Scan {
                kind: ScanKind::TimelockSweep,
            },
            config.timelock_scan(),
        );
    }

    async fn dispatch(&self, payload: &JobPayload) -> Result<StepOutcome, EngineError> {
        match payload {
            JobPayload::Step { swap_id, step } => self.engine.run_step(*swap_id, *step).await,
            JobPayload::Event { swap_id, event } => {
                self.engine.handle_event(*swap_id, event.clone()).await
            }
            JobPayload::Command { swap_id, command } => {
                self.engine.handle_command(*swap_id, *command).await
            }
            JobPayload::Scan {
                kind: ScanKind::WatchChain,
            } => {
                let report = self.watcher.poll_once().await?;
                tracing::debug!(
                    polled = report.swaps_polled,
                    events = report.events_enqueued,
                    resumed = report.steps_resumed,
                    rpc_failures = report.rpc_failures,
                    "chain poll finished"
                );
                Ok(StepOutcome::Done)
            }
            JobPayload::Scan {
                kind: ScanKind::TimelockSweep,
            } => {
                let expired = self.watcher.sweep_timelocks().await?;
                if expired > 0 {
                    tracing::info!(expired, "timelock sweep found expired swaps");
                }
                Ok(StepOutcome::Done)
            }
        }
    }

    /// Run one leased job to completion and settle it with the scheduler.
    pub async fn process(&self, lease: Lease) {
        let scheduler = self.scheduler();
        let renew_every =
            Duration::from_secs((scheduler.config().lease_duration_secs.max(3) / 3) as u64);
        let mut renew = tokio::time::interval(renew_every);
        renew.tick().await;

        let payload = lease.payload.clone();
        let mut lease = lease;
        let work = self.dispatch(&payload);
        tokio::pin!(work);
        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = renew.tick() => match scheduler.renew(&lease) {
                    Ok(renewed) => lease = renewed,
                    Err(e) => tracing::warn!(key = %lease.key, error = %e, "lease renewal failed"),
                },
            }
        };

        let settled = match result {
            Ok(StepOutcome::Done) => scheduler.complete(&lease),
            Ok(StepOutcome::Deferred(run_at)) => {
                tracing::debug!(key = %lease.key, %run_at, "job deferred");
                scheduler.defer(&lease, run_at)
            }
            Ok(StepOutcome::Retry(reason)) => self.retry(&lease, &reason),
            Ok(StepOutcome::Partial(reason)) => {
                tracing::warn!(
                    key = %lease.key,
                    expires_at = %lease.expires_at,
                    reason = %reason,
                    "outcome unknown; lease left to lapse"
                );
                scheduler.note_unknown(&lease, &reason)
            }
            Err(e) => self.retry(&lease, &e.to_string()),
        };
        if let Err(e) = settled {
            tracing::warn!(key = %lease.key, error = %e, "could not settle job");
        }
    }

    fn retry(&self, lease: &Lease, reason: &str) -> Result<(), hlv_scheduler::SchedulerError> {
        match self.scheduler().retry(lease, reason)? {
            RetryOutcome::Rescheduled { run_at } => {
                tracing::debug!(key = %lease.key, attempt = lease.attempt, %run_at, "job will retry");
            }
            RetryOutcome::DeadLettered => {
                tracing::error!(key = %lease.key, attempts = lease.attempt, reason, "job dead-lettered");
            }
        }
        Ok(())
    }

    /// Settle newly dead-lettered jobs. Returns how many.
    pub async fn handle_dead_letters(&self) -> usize {
        let dead = self.scheduler().take_dead_letters();
        for job in &dead {
            if let Err(e) = self.engine.handle_dead_letter(job).await {
                tracing::error!(key = %job.key, error = %e, "could not settle dead letter");
            }
        }
        dead.len()
    }

    /// Fire due periodic jobs, then process claimable jobs one at a time
    /// until none is left. Returns how many jobs ran.
    pub async fn run_until_idle(&self) -> Result<usize, EngineError> {
        let mut processed = 0;
        self.scheduler().enqueue_due_periodic()?;
        loop {
            // A claim can dead-letter a lapsed job, and settling it can
            // enqueue follow-up steps.
            let lease = self.scheduler().claim_next(&self.id)?;
            let settled = self.handle_dead_letters().await;
            match lease {
                Some(lease) => {
                    self.process(lease).await;
                    processed += 1;
                }
                None if settled > 0 => continue,
                None => break,
            }
        }
        Ok(processed)
    }

    /// Process jobs concurrently until `shutdown` turns true, then wait for
    /// the jobs in flight.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.register_periodic();
        let notify = self.engine.context().notify.clone();
        let idle = self.scheduler().config().process_every();
        let mut tasks = JoinSet::new();

        tracing::info!(worker = %self.id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.scheduler().enqueue_due_periodic() {
                tracing::warn!(error = %e, "could not enqueue periodic jobs");
            }
            self.handle_dead_letters().await;

            loop {
                match self.scheduler().claim_next(&self.id) {
                    Ok(Some(lease)) => {
                        let worker = self.clone();
                        tasks.spawn(async move { worker.process(lease).await });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "claim failed");
                        break;
                    }
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = notify.notified() => {}
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "job task panicked");
                    }
                }
                _ = tokio::time::sleep(idle) => {}
            }
        }

        tracing::info!(worker = %self.id, in_flight = tasks.len(), "worker stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "job task panicked");
            }
        }
        tracing::info!(worker = %self.id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Harness;
    use chrono::Duration as ChronoDuration;
    use hlv_core::{SwapStatus, SwapStep};

    fn worker(h: &Harness) -> Worker {
        Worker::new(
            h.engine.clone(),
            WatcherConfig {
                rpc_backoff_base_ms: 1,
                rpc_max_retries: 1,
                ..WatcherConfig::default()
            },
            "worker-test",
        )
    }

    #[tokio::test]
    async fn test_drives_swap_to_completion() {
        let h = Harness::new();
        let w = worker(&h);
        let watcher = ChainWatcher::new(h.ctx.clone(), WatcherConfig::default());
        let swap = h.create_with_invoice(10_000).await;

        w.run_until_idle().await.unwrap();
        assert_eq!(h.swap(swap.swap_id).await.status, SwapStatus::HtlcLocked);

        h.contract.mine_blocks(6);
        watcher.poll_once().await.unwrap();
        w.run_until_idle().await.unwrap();
        let settled = h.swap(swap.swap_id).await;
        assert_eq!(settled.status, SwapStatus::PreimageSubmitted);
        assert_eq!(h.payment.pay_calls(), 1);
        assert_eq!(h.contract.claim_calls(), 1);

        h.contract.mine_blocks(6);
        watcher.poll_once().await.unwrap();
        w.run_until_idle().await.unwrap();
        let done = h.swap(swap.swap_id).await;
        assert_eq!(done.status, SwapStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(h.scheduler.stats().queued == 0 && h.scheduler.stats().leased == 0);
    }

    #[tokio::test]
    async fn test_refund_after_timelock() {
        let h = Harness::new();
        let w = worker(&h);
        let swap = h.create_with_invoice(10_000).await;
        w.run_until_idle().await.unwrap();

        h.clock.set(swap.timelock);
        w.register_periodic();
        w.run_until_idle().await.unwrap();

        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Refunded);
        assert!(swap.refund_tx_hash.is_some());
        assert_eq!(h.payment.pay_calls(), 0);
        assert_eq!(h.contract.refund_calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_swap() {
        let h = Harness::new();
        let w = worker(&h);
        let swap = h.create_with_invoice(10_000).await;
        h.contract.set_offline(true);

        for _ in 0..6 {
            w.run_until_idle().await.unwrap();
            h.clock.advance(ChronoDuration::minutes(10));
        }

        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Failed);
        assert!(swap.last_error.unwrap().contains("dead-lettered"));
        assert_eq!(h.contract.lock_calls(), 0);
        assert!(!h.has_live_step(swap.swap_id, SwapStep::LockHtlc));
    }

    #[tokio::test]
    async fn test_run_wakes_on_enqueue_and_stops() {
        let h = Harness::new();
        let w = Arc::new(worker(&h));
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(w.clone().run(shutdown));

        let swap = h.create_with_invoice(10_000).await;
        let mut status = SwapStatus::Pending;
        for _ in 0..100 {
            status = h.swap(swap.swap_id).await.status;
            if status == SwapStatus::HtlcLocked {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, SwapStatus::HtlcLocked);

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
