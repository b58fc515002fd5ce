//! Chain watcher.
//!
//! Polls the contract chain and the payment network for every non-terminal
//! swap and turns what it sees into normalized [`WatchEvent`]s. It never
//! writes a swap: events and stalled steps are only enqueued, and the
//! engine decides what they mean. Confirmation depth is re-read on every
//! poll, so a reorganisation that lowers it is reported as well.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use hlv_core::{Swap, SwapStatus, SwapStep, WatchEvent};
use hlv_ledger::SwapFilter;
use hlv_providers::{LockState, PaymentLookup, ProviderError};
use hlv_scheduler::backoff::delay_for;
use hlv_scheduler::JobKey;
use std::future::Future;

use crate::config::WatcherConfig;
use crate::context::SwapContext;
use crate::error::EngineError;

/// Summary of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchReport {
    pub swaps_polled: usize,
    pub events_enqueued: usize,
    pub steps_resumed: usize,
    /// Swaps whose observation failed after all retries.
    pub rpc_failures: usize,
}

pub struct ChainWatcher {
    ctx: SwapContext,
    config: WatcherConfig,
}

/// The step a swap in this state is waiting on, if any.
pub fn next_step(swap: &Swap, now: DateTime<Utc>, confirmation_depth: u32) -> Option<SwapStep> {
    match swap.status {
        SwapStatus::Pending if swap.timelock_elapsed(now) => None,
        SwapStatus::Pending if swap.payment_hash.is_none() => Some(SwapStep::CreateInvoice),
        SwapStatus::Pending => Some(SwapStep::LockHtlc),
        SwapStatus::HtlcLocked if swap.timelock_elapsed(now) => Some(SwapStep::Refund),
        SwapStatus::HtlcLocked if swap.lock_confirmed(confirmation_depth) => Some(SwapStep::PayInvoice),
        SwapStatus::PaymentSettled => Some(SwapStep::SubmitPreimage),
        _ => None,
    }
}

impl ChainWatcher {
    pub fn new(ctx: SwapContext, config: WatcherConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Observe every active swap once and enqueue what changed.
    pub async fn poll_once(&self) -> Result<WatchReport, EngineError> {
        let swaps = self.ctx.ledger.list(&SwapFilter::active()).await?;
        let mut report = WatchReport {
            swaps_polled: swaps.len(),
            ..WatchReport::default()
        };

        let observed: Vec<(Swap, Result<Vec<WatchEvent>, ProviderError>)> = stream::iter(swaps)
            .map(|swap| async move {
                let result = self.observe(&swap).await;
                (swap, result)
            })
            .buffer_unordered(self.config.max_parallel_polls)
            .collect()
            .await;

        let now = self.ctx.now();
        for (swap, result) in observed {
            match result {
                Ok(events) => {
                    for event in events {
                        tracing::debug!(swap_id = %swap.swap_id, %event, "watch event");
                        self.ctx.enqueue_event(swap.swap_id, event)?;
                        report.events_enqueued += 1;
                    }
                }
                Err(err) => {
                    report.rpc_failures += 1;
                    tracing::warn!(swap_id = %swap.swap_id, error = %err, "observation failed, swap left as is");
                }
            }
            if let Some(step) = next_step(&swap, now, self.ctx.policy.confirmation_depth) {
                if self.resume(&swap, step)? {
                    report.steps_resumed += 1;
                }
            }
        }

        tracing::debug!(
            swaps = report.swaps_polled,
            events = report.events_enqueued,
            resumed = report.steps_resumed,
            failures = report.rpc_failures,
            "chain poll finished"
        );
        Ok(report)
    }

    /// Enqueue `TimelockElapsed` for every lockable or locked swap past its
    /// timelock. Returns how many were found.
    pub async fn sweep_timelocks(&self) -> Result<usize, EngineError> {
        let filter = SwapFilter {
            statuses: vec![SwapStatus::Pending, SwapStatus::HtlcLocked],
            timelock_before: Some(self.ctx.now()),
            ..SwapFilter::default()
        };
        let expired = self.ctx.ledger.list(&filter).await?;
        for swap in &expired {
            self.ctx.enqueue_event(swap.swap_id, WatchEvent::TimelockElapsed)?;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "timelock sweep found expired swaps");
        }
        Ok(expired.len())
    }

    /// Re-enqueue a step nobody is holding, e.g. after a restart lost the
    /// follow-up enqueue. Returns whether a job was added.
    fn resume(&self, swap: &Swap, step: SwapStep) -> Result<bool, EngineError> {
        let key = JobKey::step(swap.swap_id, step);
        if self.ctx.scheduler.live_job(&key).is_some() {
            return Ok(false);
        }
        tracing::debug!(swap_id = %swap.swap_id, %step, "resuming stalled step");
        self.ctx.enqueue_step(swap.swap_id, step)?;
        Ok(true)
    }

    async fn observe(&self, swap: &Swap) -> Result<Vec<WatchEvent>, ProviderError> {
        let contract = &self.ctx.capabilities.contract;
        let payment = &self.ctx.capabilities.payment;
        let depth = self.ctx.policy.confirmation_depth;
        let mut events = Vec::new();

        match swap.status {
            SwapStatus::Pending => {
                if let Some(hash) = &swap.payment_hash {
                    if let Some(observed) = self.rpc(move || contract.find_lock(hash)).await? {
                        if matches!(observed.state, LockState::Locked { .. }) {
                            events.push(WatchEvent::HtlcCreated {
                                contract_ref: observed.contract_ref,
                                tx_hash: observed.create_tx_hash,
                            });
                        }
                    }
                }
            }
            SwapStatus::HtlcLocked => {
                if let Some(contract_ref) = swap.htlc_contract_ref.as_deref() {
                    let observed = self.rpc(move || contract.lock_status(contract_ref)).await?;
                    match observed.state {
                        LockState::Locked { confirmations } => {
                            if confirmations != swap.htlc_confirmations {
                                events.push(WatchEvent::HtlcConfirmed { confirmations });
                            }
                        }
                        LockState::Refunded { tx_hash } => {
                            events.push(WatchEvent::HtlcRefunded { tx_hash });
                        }
                        LockState::Claimed { tx_hash, .. } => {
                            events.push(WatchEvent::HtlcClaimed { tx_hash });
                        }
                    }
                }
                if let Some(hash) = &swap.payment_hash {
                    if let PaymentLookup::Settled { preimage, tx_id } =
                        self.rpc(move || payment.lookup_payment(hash)).await?
                    {
                        events.push(WatchEvent::PaymentSettled { preimage, tx_id });
                    }
                }
            }
            SwapStatus::PreimageSubmitted => {
                if let Some(contract_ref) = swap.htlc_contract_ref.as_deref() {
                    let observed = self.rpc(move || contract.lock_status(contract_ref)).await?;
                    if let LockState::Claimed { confirmations, .. } = observed.state {
                        if confirmations != swap.claim_confirmations || confirmations >= depth {
                            events.push(WatchEvent::ClaimConfirmed { confirmations });
                        }
                    }
                }
            }
            _ => {}
        }

        if matches!(swap.status, SwapStatus::Pending | SwapStatus::HtlcLocked)
            && swap.timelock_elapsed(self.ctx.now())
        {
            events.push(WatchEvent::TimelockElapsed);
        }
        Ok(events)
    }

    /// Retry a read-only RPC with exponential backoff.
    async fn rpc<T, F, Fut>(&self, call: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_ms = self.config.rpc_backoff_max().as_millis() as u64;
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.rpc_max_retries => {
                    attempt += 1;
                    let delay = delay_for(attempt, self.config.rpc_backoff_base_ms, max_ms);
                    tracing::debug!(attempt, ?delay, error = %err, "watcher rpc failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
