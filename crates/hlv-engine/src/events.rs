//! Watcher events, external commands and dead letters.

use hlv_core::{StepOutput, StepRecord, StepState, Swap, SwapEvent, SwapId, SwapStatus, SwapStep, WatchEvent};
use hlv_providers::{LockState, PaymentLookup};
use hlv_scheduler::{Job, JobPayload, JobState, SwapCommand};

use crate::engine::{StepOutcome, SwapEngine};
use crate::error::{EngineError, ErrorClass};
use crate::executor::Reconciled;

/// `last_error` of a swap cancelled because nothing was ever locked.
pub const TIMELOCK_ELAPSED_BEFORE_LOCK: &str = "timelock elapsed before lock";

impl SwapEngine {
    /// Apply a normalized watcher event to the swap it concerns.
    pub async fn handle_event(&self, swap_id: SwapId, event: WatchEvent) -> Result<StepOutcome, EngineError> {
        match self.apply_event(swap_id, event.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.settle_error(swap_id, event.name(), err).await,
        }
    }

    async fn apply_event(&self, swap_id: SwapId, event: WatchEvent) -> Result<StepOutcome, EngineError> {
        let ctx = &self.ctx;
        let Some(swap) = ctx.ledger.get(swap_id).await? else {
            tracing::warn!(%swap_id, %event, "event for unknown swap dropped");
            return Ok(StepOutcome::Done);
        };
        if swap.is_terminal() {
            return Ok(StepOutcome::Done);
        }
        tracing::debug!(%swap_id, status = %swap.status, %event, "handling watch event");

        let now = ctx.now();
        let depth = ctx.policy.confirmation_depth;

        match event {
            WatchEvent::HtlcCreated {
                contract_ref,
                tx_hash,
            } => {
                if swap.status != SwapStatus::Pending {
                    return Ok(StepOutcome::Done);
                }
                let output = StepOutput::LockCreated {
                    contract_ref,
                    tx_hash,
                };
                self.record_observed(&swap, SwapStep::LockHtlc, &output).await?;
                self.apply(&swap, SwapStep::LockHtlc, output).await
            }
            WatchEvent::HtlcConfirmed { confirmations } => {
                if swap.status != SwapStatus::HtlcLocked {
                    return Ok(StepOutcome::Done);
                }
                let swap = if swap.htlc_confirmations != confirmations {
                    let next = swap.advance(SwapEvent::HtlcConfirmed, now, |s| {
                        s.htlc_confirmations = confirmations;
                    })?;
                    ctx.commit(&swap, next).await?
                } else {
                    swap
                };
                if swap.lock_confirmed(depth) {
                    ctx.enqueue_step(swap_id, SwapStep::PayInvoice)?;
                } else {
                    tracing::debug!(%swap_id, confirmations, depth, "lock below confirmation depth");
                }
                Ok(StepOutcome::Done)
            }
            WatchEvent::PaymentSettled { preimage, tx_id } => {
                if swap.status != SwapStatus::HtlcLocked {
                    return Ok(StepOutcome::Done);
                }
                if !swap.payment_hash.is_some_and(|hash| preimage.matches(&hash)) {
                    return Err(EngineError::Integrity(format!(
                        "observed preimage does not hash to the payment hash of swap {}",
                        swap_id
                    )));
                }
                let output = StepOutput::InvoicePaid { preimage, tx_id };
                self.record_observed(&swap, SwapStep::PayInvoice, &output).await?;
                self.apply(&swap, SwapStep::PayInvoice, output).await
            }
            WatchEvent::TimelockElapsed => self.on_timelock_elapsed(swap).await,
            WatchEvent::HtlcRefunded { tx_hash } => {
                if !matches!(swap.status, SwapStatus::Pending | SwapStatus::HtlcLocked) {
                    return Ok(StepOutcome::Done);
                }
                let output = StepOutput::Refunded { tx_hash };
                self.record_observed(&swap, SwapStep::Refund, &output).await?;
                self.apply(&swap, SwapStep::Refund, output).await
            }
            WatchEvent::HtlcClaimed { tx_hash } => self.adopt_claim(swap, tx_hash).await,
            WatchEvent::ClaimConfirmed { confirmations } => {
                if swap.status != SwapStatus::PreimageSubmitted {
                    return Ok(StepOutcome::Done);
                }
                if confirmations >= depth {
                    let next = swap.advance(SwapEvent::ClaimConfirmed, now, |s| {
                        s.claim_confirmations = confirmations;
                    })?;
                    let done = ctx.commit(&swap, next).await?;
                    tracing::info!(%swap_id, completed_at = ?done.completed_at, "swap completed");
                } else if confirmations != swap.claim_confirmations {
                    let next = swap.amend(now, |s| s.claim_confirmations = confirmations)?;
                    ctx.commit(&swap, next).await?;
                }
                Ok(StepOutcome::Done)
            }
        }
    }

    async fn on_timelock_elapsed(&self, swap: Swap) -> Result<StepOutcome, EngineError> {
        let ctx = &self.ctx;
        let now = ctx.now();
        let swap_id = swap.swap_id;
        if !swap.timelock_elapsed(now) {
            tracing::debug!(%swap_id, timelock = %swap.timelock, "timelock not yet elapsed");
            return Ok(StepOutcome::Done);
        }

        match swap.status {
            SwapStatus::Pending => {
                // A lock whose creation response was lost still needs a refund.
                if let Some(hash) = swap.payment_hash {
                    if let Some(observed) = ctx.capabilities.contract.find_lock(&hash).await? {
                        if matches!(observed.state, LockState::Locked { .. }) {
                            tracing::warn!(%swap_id, contract_ref = %observed.contract_ref, "unrecorded lock found at expiry");
                            let output = StepOutput::LockCreated {
                                contract_ref: observed.contract_ref,
                                tx_hash: observed.create_tx_hash,
                            };
                            self.record_observed(&swap, SwapStep::LockHtlc, &output).await?;
                            self.apply(&swap, SwapStep::LockHtlc, output).await?;
                            ctx.enqueue_step(swap_id, SwapStep::Refund)?;
                            return Ok(StepOutcome::Done);
                        }
                    }
                }
                let next = swap.advance(SwapEvent::Cancelled, now, |s| {
                    s.last_error = Some(TIMELOCK_ELAPSED_BEFORE_LOCK.to_string());
                })?;
                ctx.commit(&swap, next).await?;
                Ok(StepOutcome::Done)
            }
            SwapStatus::HtlcLocked => {
                tracing::info!(%swap_id, "timelock elapsed without settlement, refunding");
                ctx.enqueue_step(swap_id, SwapStep::Refund)?;
                Ok(StepOutcome::Done)
            }
            // A settled swap races the timelock in the submit step itself.
            _ => Ok(StepOutcome::Done),
        }
    }

    /// Take over a claim found on chain. A locked swap must first show the
    /// settled payment the claim implies.
    pub(crate) async fn adopt_claim(&self, swap: Swap, tx_hash: String) -> Result<StepOutcome, EngineError> {
        let ctx = &self.ctx;
        let swap_id = swap.swap_id;
        let swap = match swap.status {
            SwapStatus::PaymentSettled => swap,
            SwapStatus::HtlcLocked => {
                let hash = swap.payment_hash.ok_or_else(|| {
                    EngineError::Integrity(format!("locked swap {} has no payment hash", swap_id))
                })?;
                match ctx.capabilities.payment.lookup_payment(&hash).await? {
                    PaymentLookup::Settled { preimage, tx_id } if preimage.matches(&hash) => {
                        let output = StepOutput::InvoicePaid { preimage, tx_id };
                        self.record_observed(&swap, SwapStep::PayInvoice, &output).await?;
                        self.apply(&swap, SwapStep::PayInvoice, output).await?;
                        ctx.ledger.get(swap_id).await?.ok_or(EngineError::NotFound(swap_id))?
                    }
                    PaymentLookup::InFlight => {
                        return Ok(StepOutcome::Retry("lock claimed while the payment is in flight".into()));
                    }
                    _ => {
                        ctx.fail_swap(&swap, format!("lock claimed on chain in {} without a settled payment", tx_hash))
                            .await?;
                        return Ok(StepOutcome::Done);
                    }
                }
            }
            _ => return Ok(StepOutcome::Done),
        };
        if swap.status != SwapStatus::PaymentSettled {
            return Ok(StepOutcome::Done);
        }
        tracing::info!(%swap_id, %tx_hash, "adopting claim seen on chain");
        let output = StepOutput::PreimageSubmitted { tx_hash };
        self.record_observed(&swap, SwapStep::SubmitPreimage, &output).await?;
        self.apply(&swap, SwapStep::SubmitPreimage, output).await
    }

    /// Store an upstream effect learned from observation as the step's result,
    /// so a queued execution of the same step applies it instead of acting.
    pub(crate) async fn record_observed(&self, swap: &Swap, step: SwapStep, output: &StepOutput) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let existing = ctx.ledger.step_record(swap.swap_id, step).await?;
        if existing.as_ref().and_then(|r| r.output()).is_some() {
            return Ok(());
        }
        let attempts = existing.map_or(0, |r| r.attempts);
        let record = StepRecord::started(swap.swap_id, step, attempts, ctx.now()).with_state(
            StepState::Succeeded {
                output: output.clone(),
            },
            ctx.now(),
        );
        ctx.ledger.put_step_record(record).await?;
        Ok(())
    }

    /// Cancel a pending swap.
    ///
    /// Refused once an HTLC exists, including one whose creation was never
    /// recorded.
    pub async fn cancel(&self, swap_id: SwapId) -> Result<Swap, EngineError> {
        let ctx = &self.ctx;
        let swap = ctx
            .ledger
            .get(swap_id)
            .await?
            .ok_or(EngineError::NotFound(swap_id))?;
        if swap.status != SwapStatus::Pending {
            return Err(EngineError::Precondition(format!(
                "swap {} is {}; only pending swaps can be cancelled",
                swap_id, swap.status
            )));
        }

        if let Some(record) = ctx.ledger.step_record(swap_id, SwapStep::LockHtlc).await? {
            let locked = match record.output() {
                Some(output) => Some(output.clone()),
                None if record.is_ambiguous() => match self.reconcile(&swap, SwapStep::LockHtlc).await? {
                    Reconciled::Happened(output) => Some(output),
                    _ => None,
                },
                None => None,
            };
            if let Some(output) = locked {
                self.record_observed(&swap, SwapStep::LockHtlc, &output).await?;
                self.apply(&swap, SwapStep::LockHtlc, output).await?;
                return Err(EngineError::Precondition(format!(
                    "swap {} already has an HTLC and can no longer be cancelled",
                    swap_id
                )));
            }
        }

        let next = swap.advance(SwapEvent::Cancelled, ctx.now(), |s| {
            s.last_error = Some("cancelled by request".to_string());
        })?;
        let stored = ctx.commit(&swap, next).await?;
        tracing::info!(%swap_id, "swap cancelled");
        Ok(stored)
    }

    /// Run a queued command. A command that no longer applies is dropped.
    pub async fn handle_command(&self, swap_id: SwapId, command: SwapCommand) -> Result<StepOutcome, EngineError> {
        match command {
            SwapCommand::Cancel => match self.cancel(swap_id).await {
                Ok(_) => Ok(StepOutcome::Done),
                Err(err) if matches!(err.class(), ErrorClass::Validation | ErrorClass::Precondition) => {
                    tracing::warn!(%swap_id, error = %err, "queued cancellation dropped");
                    Ok(StepOutcome::Done)
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Settle a job that exhausted its attempts. The swap fails unless the
    /// step took effect upstream or the lock was closed on chain.
    pub async fn handle_dead_letter(&self, job: &Job) -> Result<(), EngineError> {
        let what = match &job.payload {
            JobPayload::Step { step, .. } => step.to_string(),
            JobPayload::Event { event, .. } => format!("event {}", event.name()),
            JobPayload::Command { command, .. } => format!("command {}", command.as_str()),
            JobPayload::Scan { kind } => {
                tracing::error!(key = %job.key, scan = kind.as_str(), attempts = job.attempts, "scan dead-lettered");
                return Ok(());
            }
        };
        let Some(swap_id) = job.payload.swap_id() else {
            return Ok(());
        };
        let Some(swap) = self.ctx.ledger.get(swap_id).await? else {
            return Ok(());
        };
        if swap.is_terminal() {
            return Ok(());
        }
        if let JobPayload::Step { step, .. } = &job.payload {
            if self.settle_dead_step(&swap, *step).await? {
                return Ok(());
            }
            if matches!(step, SwapStep::Refund | SwapStep::SubmitPreimage)
                && self.adopt_closed_lock(&swap).await?.is_some()
            {
                return Ok(());
            }
        }
        let reason = match &job.state {
            JobState::Dead { reason } => reason.clone(),
            _ => job.last_error.clone().unwrap_or_else(|| "unknown error".to_string()),
        };
        self.ctx
            .fail_swap(
                &swap,
                format!("{} dead-lettered after {} attempts: {}", what, job.attempts, reason),
            )
            .await?;
        Ok(())
    }

    /// A dead step may still have taken effect upstream. Apply what landed,
    /// and keep watching what is unresolved. Returns whether the swap must
    /// stay alive.
    async fn settle_dead_step(&self, swap: &Swap, step: SwapStep) -> Result<bool, EngineError> {
        let ctx = &self.ctx;
        let swap_id = swap.swap_id;
        let Some(record) = ctx.ledger.step_record(swap_id, step).await? else {
            return Ok(false);
        };
        if let Some(output) = record.output() {
            self.apply(swap, step, output.clone()).await?;
            return Ok(true);
        }
        if !record.is_ambiguous() {
            return Ok(false);
        }

        match self.reconcile(swap, step).await? {
            Reconciled::Happened(output) => {
                tracing::warn!(%swap_id, %step, "dead-lettered step had taken effect, applying it");
                let done = record.with_state(
                    StepState::Succeeded {
                        output: output.clone(),
                    },
                    ctx.now(),
                );
                ctx.ledger.put_step_record(done).await?;
                self.apply(swap, step, output).await?;
                Ok(true)
            }
            Reconciled::Unknown(reason) => {
                tracing::warn!(%swap_id, %step, reason = %reason, "dead-lettered step unresolved upstream, requeued");
                ctx.enqueue_step(swap_id, step)?;
                Ok(true)
            }
            Reconciled::NotHappened => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Harness;
    use chrono::Duration;
    use hlv_core::Preimage;
    use hlv_ledger::ISwapLedger;
    use hlv_providers::IPaymentProvider;

    #[tokio::test]
    async fn test_htlc_confirmed_queues_payment_at_depth() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        h.engine.run_step(swap.swap_id, SwapStep::LockHtlc).await.unwrap();

        h.engine
            .handle_event(swap.swap_id, WatchEvent::HtlcConfirmed { confirmations: 3 })
            .await
            .unwrap();
        assert_eq!(h.swap(swap.swap_id).await.htlc_confirmations, 3);
        assert!(!h.has_live_step(swap.swap_id, SwapStep::PayInvoice));

        h.engine
            .handle_event(swap.swap_id, WatchEvent::HtlcConfirmed { confirmations: 6 })
            .await
            .unwrap();
        assert!(h.has_live_step(swap.swap_id, SwapStep::PayInvoice));
    }

    #[tokio::test]
    async fn test_reorg_lowers_confirmations() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        h.engine
            .handle_event(swap.swap_id, WatchEvent::HtlcConfirmed { confirmations: 2 })
            .await
            .unwrap();
        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::HtlcLocked);
        assert_eq!(swap.htlc_confirmations, 2);
    }

    #[tokio::test]
    async fn test_timelock_elapsed_before_lock_cancels() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        h.clock.set(swap.timelock);

        h.engine
            .handle_event(swap.swap_id, WatchEvent::TimelockElapsed)
            .await
            .unwrap();
        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Cancelled);
        assert_eq!(swap.last_error.as_deref(), Some(TIMELOCK_ELAPSED_BEFORE_LOCK));
    }

    #[tokio::test]
    async fn test_timelock_elapsed_when_locked_queues_refund() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        h.engine.run_step(swap.swap_id, SwapStep::LockHtlc).await.unwrap();
        h.clock.set(swap.timelock + Duration::seconds(1));

        h.engine
            .handle_event(swap.swap_id, WatchEvent::TimelockElapsed)
            .await
            .unwrap();
        assert!(h.has_live_step(swap.swap_id, SwapStep::Refund));
    }

    #[tokio::test]
    async fn test_early_timelock_event_is_ignored() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        h.engine
            .handle_event(swap.swap_id, WatchEvent::TimelockElapsed)
            .await
            .unwrap();
        assert_eq!(h.swap(swap.swap_id).await.status, SwapStatus::Pending);
    }

    #[tokio::test]
    async fn test_claim_confirmed_completes_at_depth() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        h.engine.run_step(swap.swap_id, SwapStep::PayInvoice).await.unwrap();
        h.engine.run_step(swap.swap_id, SwapStep::SubmitPreimage).await.unwrap();

        h.engine
            .handle_event(swap.swap_id, WatchEvent::ClaimConfirmed { confirmations: 2 })
            .await
            .unwrap();
        let pending = h.swap(swap.swap_id).await;
        assert_eq!(pending.status, SwapStatus::PreimageSubmitted);
        assert_eq!(pending.claim_confirmations, 2);

        h.engine
            .handle_event(swap.swap_id, WatchEvent::ClaimConfirmed { confirmations: 6 })
            .await
            .unwrap();
        let done = h.swap(swap.swap_id).await;
        assert_eq!(done.status, SwapStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_payment_settled_event_records_step() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        let hash = swap.payment_hash.unwrap();
        let preimage = h.payment.preimage_for(&hash).unwrap();

        h.engine
            .handle_event(
                swap.swap_id,
                WatchEvent::PaymentSettled {
                    preimage,
                    tx_id: "ln-observed".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(h.swap(swap.swap_id).await.status, SwapStatus::PaymentSettled);

        // A queued pay step now applies the observed result instead of paying.
        h.engine.run_step(swap.swap_id, SwapStep::PayInvoice).await.unwrap();
        assert_eq!(h.payment.pay_calls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_preimage_event_fails_swap() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;

        h.engine
            .handle_event(
                swap.swap_id,
                WatchEvent::PaymentSettled {
                    preimage: Preimage::random(),
                    tx_id: "ln-bogus".into(),
                },
            )
            .await
            .unwrap();
        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Failed);
        assert!(swap.preimage.is_none());
        assert!(swap.last_error.unwrap().contains("integrity"));
        let record = h
            .ledger
            .step_record(swap.swap_id, SwapStep::PayInvoice)
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_htlc_refunded_event_marks_refund() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        h.engine
            .handle_event(
                swap.swap_id,
                WatchEvent::HtlcRefunded {
                    tx_hash: "0xrefund".into(),
                },
            )
            .await
            .unwrap();

        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Refunded);
        assert_eq!(swap.refund_tx_hash.as_deref(), Some("0xrefund"));
        let record = h.ledger.step_record(swap.swap_id, SwapStep::Refund).await.unwrap().unwrap();
        assert!(record.output().is_some());
    }

    #[tokio::test]
    async fn test_htlc_claimed_event_adopts_settled_payment() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        let invoice = swap.payment_invoice.clone().unwrap();
        h.payment.pay_invoice(&invoice, swap.payment_amount).await.unwrap();

        h.engine
            .handle_event(
                swap.swap_id,
                WatchEvent::HtlcClaimed {
                    tx_hash: "0xclaim".into(),
                },
            )
            .await
            .unwrap();

        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::PreimageSubmitted);
        assert_eq!(swap.claim_tx_hash.as_deref(), Some("0xclaim"));
        assert!(swap.preimage.unwrap().matches(&swap.payment_hash.unwrap()));
        assert_eq!(h.contract.claim_calls(), 0);
    }

    #[tokio::test]
    async fn test_htlc_claimed_without_payment_fails_swap() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        h.engine
            .handle_event(
                swap.swap_id,
                WatchEvent::HtlcClaimed {
                    tx_hash: "0xclaim".into(),
                },
            )
            .await
            .unwrap();

        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Failed);
        assert!(swap.last_error.unwrap().contains("without a settled payment"));
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        h.engine.run_step(swap.swap_id, SwapStep::LockHtlc).await.unwrap();

        let err = h.engine.cancel(swap.swap_id).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert_eq!(h.swap(swap.swap_id).await.status, SwapStatus::HtlcLocked);
    }

    #[tokio::test]
    async fn test_cancel_refused_when_lock_landed_unrecorded() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        h.contract.set_response_delay(Some(std::time::Duration::from_millis(500)));
        let engine = h.engine_with_timeout(50);
        engine.run_step(swap.swap_id, SwapStep::LockHtlc).await.unwrap();
        assert_eq!(h.swap(swap.swap_id).await.status, SwapStatus::Pending);

        let err = h.engine.cancel(swap.swap_id).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert_eq!(h.swap(swap.swap_id).await.status, SwapStatus::HtlcLocked);
    }

    fn dead_step(h: &Harness, swap_id: SwapId, step: SwapStep, reason: &str) -> Job {
        let now = h.now();
        let mut job = Job::new(
            JobPayload::Step { swap_id, step },
            hlv_scheduler::Priority::High,
            now,
            now,
        );
        job.attempts = 5;
        job.state = JobState::Dead {
            reason: reason.into(),
        };
        job
    }

    #[tokio::test]
    async fn test_dead_letter_fails_swap() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        let job = dead_step(&h, swap.swap_id, SwapStep::LockHtlc, "chain rpc unreachable");

        h.engine.handle_dead_letter(&job).await.unwrap();
        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Failed);
        let error = swap.last_error.unwrap();
        assert!(error.contains("lock_htlc"));
        assert!(error.contains("chain rpc unreachable"));
    }

    #[tokio::test]
    async fn test_dead_letter_applies_payment_that_landed() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        h.payment.set_pay_delay(Some(std::time::Duration::from_millis(500)));
        let outcome = h
            .engine_with_timeout(50)
            .run_step(swap.swap_id, SwapStep::PayInvoice)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Partial(_)));

        let job = dead_step(&h, swap.swap_id, SwapStep::PayInvoice, "provider call timed out");
        h.engine.handle_dead_letter(&job).await.unwrap();

        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::PaymentSettled);
        assert!(swap.preimage.unwrap().matches(&swap.payment_hash.unwrap()));
        assert_eq!(h.payment.pay_calls(), 1);
        assert!(h.has_live_step(swap.swap_id, SwapStep::SubmitPreimage));
    }

    #[tokio::test]
    async fn test_dead_letter_keeps_in_flight_payment_alive() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        h.drain_jobs();
        h.payment.set_hold_in_flight(true);
        h.engine_with_timeout(50)
            .run_step(swap.swap_id, SwapStep::PayInvoice)
            .await
            .unwrap();

        let job = dead_step(&h, swap.swap_id, SwapStep::PayInvoice, "provider call timed out");
        h.engine.handle_dead_letter(&job).await.unwrap();

        assert_eq!(h.swap(swap.swap_id).await.status, SwapStatus::HtlcLocked);
        assert!(h.has_live_step(swap.swap_id, SwapStep::PayInvoice));
        assert_eq!(h.payment.pay_calls(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_after_unanswered_lock_fails_swap() {
        let h = Harness::new();
        let swap = h.create_with_invoice(10_000).await;
        h.ledger
            .put_step_record(StepRecord::started(swap.swap_id, SwapStep::LockHtlc, 5, h.now()))
            .await
            .unwrap();

        let job = dead_step(&h, swap.swap_id, SwapStep::LockHtlc, "provider call timed out");
        h.engine.handle_dead_letter(&job).await.unwrap();

        let swap = h.swap(swap.swap_id).await;
        assert_eq!(swap.status, SwapStatus::Failed);
        assert!(swap.last_error.unwrap().contains("timed out"));
    }
}
