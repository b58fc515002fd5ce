//! Idempotent, timeout-bounded execution of swap steps.
//!
//! Every side effect is bracketed by a step record keyed by
//! `(swap_id, step)`: `Started` before `execute`, then `Succeeded`,
//! `Partial` or `Failed`. A `Succeeded` record is applied instead of
//! re-executing; a `Started` or `Partial` record forces a reconciliation
//! query against the provider first.

use chrono::{DateTime, Utc};
use hlv_core::{
    Preimage, StepOutput, StepRecord, StepState, Swap, SwapDirection, SwapEvent, SwapId,
    SwapStatus, SwapStep,
};
use hlv_providers::{Capabilities, InvoiceRequest, LockRequest, LockState, PaymentLookup, ProviderError};

use crate::engine::{StepOutcome, SwapEngine};
use crate::error::EngineError;

/// A provider call ready to run.
#[derive(Debug)]
enum StepAction {
    CreateInvoice(InvoiceRequest),
    Lock(LockRequest),
    Pay { invoice: String, amount_sats: u64 },
    Claim { contract_ref: String, preimage: Preimage },
    Refund { contract_ref: String },
}

impl StepAction {
    async fn precheck(&self, caps: &Capabilities) -> Result<(), ProviderError> {
        match self {
            Self::CreateInvoice(request) => caps.payment.precheck_create_invoice(request).await,
            Self::Lock(request) => caps.contract.precheck_lock(request).await,
            Self::Pay {
                invoice,
                amount_sats,
            } => caps.payment.precheck_pay_invoice(invoice, *amount_sats).await,
            Self::Claim {
                contract_ref,
                preimage,
            } => caps.contract.precheck_claim(contract_ref, preimage).await,
            Self::Refund { contract_ref } => caps.contract.precheck_refund(contract_ref).await,
        }
    }

    async fn perform(self, caps: Capabilities) -> Result<StepOutput, ProviderError> {
        match self {
            Self::CreateInvoice(request) => {
                let issued = caps.payment.create_invoice(request).await?;
                Ok(StepOutput::InvoiceIssued {
                    invoice: issued.invoice,
                    payment_hash: issued.payment_hash,
                    expires_at: issued.expires_at,
                })
            }
            Self::Lock(request) => {
                let receipt = caps.contract.create_lock(request).await?;
                Ok(StepOutput::LockCreated {
                    contract_ref: receipt.contract_ref,
                    tx_hash: receipt.tx_hash,
                })
            }
            Self::Pay {
                invoice,
                amount_sats,
            } => {
                let receipt = caps.payment.pay_invoice(&invoice, amount_sats).await?;
                Ok(StepOutput::InvoicePaid {
                    preimage: receipt.preimage,
                    tx_id: receipt.tx_id,
                })
            }
            Self::Claim {
                contract_ref,
                preimage,
            } => {
                let receipt = caps.contract.submit_preimage(&contract_ref, preimage).await?;
                Ok(StepOutput::PreimageSubmitted {
                    tx_hash: receipt.tx_hash,
                })
            }
            Self::Refund { contract_ref } => {
                let receipt = caps.contract.refund(&contract_ref).await?;
                Ok(StepOutput::Refunded {
                    tx_hash: receipt.tx_hash,
                })
            }
        }
    }
}

/// Guard evaluation result for one step.
#[derive(Debug)]
enum Plan {
    Execute(StepAction),
    /// The swap has moved past this step.
    Skip(&'static str),
    /// Not safe to act; record why and drop the job.
    Hold(String),
    Defer(DateTime<Utc>),
}

/// What a reconciliation query found upstream.
#[derive(Debug)]
pub(crate) enum Reconciled {
    Happened(StepOutput),
    NotHappened,
    Unknown(String),
}

/// Party funding the HTLC.
fn htlc_sender(swap: &Swap) -> String {
    match swap.direction {
        SwapDirection::ChainToPayment => swap.user_address.clone(),
        SwapDirection::PaymentToChain => swap.agent_address.clone(),
    }
}

impl SwapEngine {
    /// Run `step` for `swap_id` at most once upstream, however often it is
    /// triggered.
    pub async fn run_step(&self, swap_id: SwapId, step: SwapStep) -> Result<StepOutcome, EngineError> {
        match self.drive_step(swap_id, step).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.settle_error(swap_id, step.as_str(), err).await,
        }
    }

    async fn drive_step(&self, swap_id: SwapId, step: SwapStep) -> Result<StepOutcome, EngineError> {
        let ctx = &self.ctx;
        let Some(swap) = ctx.ledger.get(swap_id).await? else {
            tracing::warn!(%swap_id, %step, "step for unknown swap dropped");
            return Ok(StepOutcome::Done);
        };
        if swap.is_terminal() {
            tracing::debug!(%swap_id, %step, status = %swap.status, "swap is terminal, step skipped");
            return Ok(StepOutcome::Done);
        }

        let record = ctx.ledger.step_record(swap_id, step).await?;
        if let Some(record) = &record {
            if let Some(output) = record.output() {
                tracing::debug!(%swap_id, %step, "step already succeeded, applying recorded output");
                return self.apply(&swap, step, output.clone()).await;
            }
            if record.is_ambiguous() {
                match self.reconcile(&swap, step).await? {
                    Reconciled::Happened(output) => {
                        tracing::info!(%swap_id, %step, "reconciliation found the step took effect");
                        let done = record.with_state(
                            StepState::Succeeded {
                                output: output.clone(),
                            },
                            ctx.now(),
                        );
                        ctx.ledger.put_step_record(done).await?;
                        return self.apply(&swap, step, output).await;
                    }
                    Reconciled::Unknown(reason) => {
                        tracing::warn!(%swap_id, %step, reason = %reason, "step outcome still unknown");
                        return Ok(StepOutcome::Retry(reason));
                    }
                    Reconciled::NotHappened => {
                        tracing::info!(%swap_id, %step, "reconciliation found no upstream effect");
                    }
                }
            }
        }

        if matches!(step, SwapStep::Refund | SwapStep::SubmitPreimage) {
            if let Some(outcome) = self.adopt_closed_lock(&swap).await? {
                return Ok(outcome);
            }
        }

        let action = match self.plan(&swap, step)? {
            Plan::Execute(action) => action,
            Plan::Skip(reason) => {
                tracing::debug!(%swap_id, %step, status = %swap.status, reason, "step not applicable");
                return Ok(StepOutcome::Done);
            }
            Plan::Hold(reason) => {
                tracing::warn!(%swap_id, %step, reason = %reason, "step held");
                ctx.annotate(&swap, reason).await?;
                return Ok(StepOutcome::Done);
            }
            Plan::Defer(until) => {
                tracing::debug!(%swap_id, %step, %until, "step deferred");
                return Ok(StepOutcome::Deferred(until));
            }
        };

        action.precheck(&ctx.capabilities).await?;

        let attempts = record.as_ref().map_or(0, |r| r.attempts) + 1;
        if attempts > ctx.policy.max_step_attempts {
            let reason = format!(
                "{} exhausted {} attempts",
                step, ctx.policy.max_step_attempts
            );
            ctx.fail_swap(&swap, reason).await?;
            return Ok(StepOutcome::Done);
        }

        let started = StepRecord::started(swap_id, step, attempts, ctx.now());
        ctx.ledger.put_step_record(started.clone()).await?;
        tracing::info!(%swap_id, %step, attempt = attempts, "executing step");

        match self.execute(action).await {
            Ok(output) => {
                let done = started.with_state(
                    StepState::Succeeded {
                        output: output.clone(),
                    },
                    ctx.now(),
                );
                ctx.ledger.put_step_record(done).await?;
                self.apply(&swap, step, output).await
            }
            Err(err) => self.record_failure(&started, err).await,
        }
    }

    /// Evaluate the step's guards against the current record.
    fn plan(&self, swap: &Swap, step: SwapStep) -> Result<Plan, EngineError> {
        let now = self.ctx.now();
        let policy = &self.ctx.policy;

        match step {
            SwapStep::CreateInvoice => {
                if swap.status != SwapStatus::Pending || swap.payment_hash.is_some() {
                    return Ok(Plan::Skip("invoice already attached"));
                }
                Ok(Plan::Execute(StepAction::CreateInvoice(InvoiceRequest {
                    amount_sats: swap.payment_amount,
                    description: format!("HLV swap {}", swap.swap_id),
                    expiry_secs: policy.invoice_expiry_secs,
                    credential: None,
                })))
            }
            SwapStep::LockHtlc => {
                if swap.status != SwapStatus::Pending {
                    return Ok(Plan::Skip("lock already recorded"));
                }
                let payment_hash = swap
                    .payment_hash
                    .ok_or_else(|| EngineError::Precondition("no invoice attached".into()))?;
                let earliest = now + policy.safety_margin();
                if swap.timelock < earliest {
                    return Err(EngineError::Precondition(format!(
                        "timelock {} is inside the {}s safety margin",
                        swap.timelock, policy.safety_margin_secs
                    )));
                }
                Ok(Plan::Execute(StepAction::Lock(LockRequest {
                    payment_hash,
                    amount: swap.htlc_amount,
                    timelock: swap.timelock,
                    sender: htlc_sender(swap),
                    recipient: swap.htlc_recipient.clone(),
                })))
            }
            SwapStep::PayInvoice => {
                if swap.status != SwapStatus::HtlcLocked {
                    return Ok(Plan::Skip("swap is not awaiting payment"));
                }
                if !swap.lock_confirmed(policy.confirmation_depth) {
                    return Ok(Plan::Skip("lock below confirmation depth"));
                }
                if now + policy.safety_margin() > swap.timelock {
                    return Ok(Plan::Hold(
                        "timelock too close to pay the invoice safely".into(),
                    ));
                }
                let invoice = swap.payment_invoice.clone().ok_or_else(|| {
                    EngineError::Integrity(format!("locked swap {} has no invoice", swap.swap_id))
                })?;
                Ok(Plan::Execute(StepAction::Pay {
                    invoice,
                    amount_sats: swap.payment_amount,
                }))
            }
            SwapStep::SubmitPreimage => {
                if swap.status != SwapStatus::PaymentSettled {
                    return Ok(Plan::Skip("swap is not awaiting a claim"));
                }
                swap.verify_integrity()?;
                let preimage = swap.preimage.clone().ok_or_else(|| {
                    EngineError::Integrity(format!("settled swap {} has no preimage", swap.swap_id))
                })?;
                let contract_ref = swap.htlc_contract_ref.clone().ok_or_else(|| {
                    EngineError::Integrity(format!("settled swap {} has no lock", swap.swap_id))
                })?;
                if swap.timelock_elapsed(now) {
                    return Err(EngineError::Expired(
                        "timelock elapsed before the preimage was submitted".into(),
                    ));
                }
                Ok(Plan::Execute(StepAction::Claim {
                    contract_ref,
                    preimage,
                }))
            }
            SwapStep::Refund => {
                if !matches!(swap.status, SwapStatus::Pending | SwapStatus::HtlcLocked) {
                    return Ok(Plan::Skip("swap is past the refund window"));
                }
                let Some(contract_ref) = swap.htlc_contract_ref.clone() else {
                    return Ok(Plan::Skip("no lock to refund"));
                };
                if !swap.timelock_elapsed(now) {
                    return Ok(Plan::Defer(swap.timelock));
                }
                Ok(Plan::Execute(StepAction::Refund { contract_ref }))
            }
        }
    }

    /// Run the provider call on its own task, bounded by the step timeout.
    ///
    /// A call that outlives the timeout is detached, not cancelled.
    async fn execute(&self, action: StepAction) -> Result<StepOutput, ProviderError> {
        let timeout = self.ctx.policy.step_timeout();
        let task = tokio::spawn(action.perform(self.ctx.capabilities.clone()));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ProviderError::Transient(format!(
                "step task aborted: {}",
                join_err
            ))),
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }

    async fn record_failure(
        &self,
        started: &StepRecord,
        err: ProviderError,
    ) -> Result<StepOutcome, EngineError> {
        let (swap_id, step) = (started.swap_id, started.step);
        let reason = err.to_string();
        let now = self.ctx.now();

        match err {
            ProviderError::Timeout(_) => {
                tracing::warn!(%swap_id, %step, reason = %reason, "step outcome unknown, awaiting reconciliation");
                let partial = started.with_state(StepState::Partial { reason: reason.clone() }, now);
                self.ctx.ledger.put_step_record(partial).await?;
                Ok(StepOutcome::Partial(reason))
            }
            ProviderError::Transient(_) => {
                let partial = started.with_state(StepState::Partial { reason: reason.clone() }, now);
                self.ctx.ledger.put_step_record(partial).await?;
                Ok(StepOutcome::Retry(reason))
            }
            other => {
                let failed = started.with_state(StepState::Failed { reason }, now);
                self.ctx.ledger.put_step_record(failed).await?;
                Err(other.into())
            }
        }
    }

    /// Ask the provider whether an earlier `execute` took effect.
    pub(crate) async fn reconcile(&self, swap: &Swap, step: SwapStep) -> Result<Reconciled, EngineError> {
        let caps = &self.ctx.capabilities;
        let reconciled = match step {
            // A second invoice for the same swap is harmless.
            SwapStep::CreateInvoice => Reconciled::NotHappened,
            SwapStep::LockHtlc => match swap.payment_hash {
                None => Reconciled::NotHappened,
                Some(hash) => match caps.contract.find_lock(&hash).await? {
                    Some(observed) => Reconciled::Happened(StepOutput::LockCreated {
                        contract_ref: observed.contract_ref,
                        tx_hash: observed.create_tx_hash,
                    }),
                    None => Reconciled::NotHappened,
                },
            },
            SwapStep::PayInvoice => match swap.payment_hash {
                None => Reconciled::NotHappened,
                Some(hash) => match caps.payment.lookup_payment(&hash).await? {
                    PaymentLookup::Settled { preimage, tx_id } => {
                        Reconciled::Happened(StepOutput::InvoicePaid { preimage, tx_id })
                    }
                    PaymentLookup::InFlight => Reconciled::Unknown("payment still in flight".into()),
                    PaymentLookup::Unknown | PaymentLookup::Failed { .. } => Reconciled::NotHappened,
                },
            },
            SwapStep::SubmitPreimage | SwapStep::Refund => match &swap.htlc_contract_ref {
                None => Reconciled::NotHappened,
                Some(contract_ref) => {
                    let observed = caps.contract.lock_status(contract_ref).await?;
                    match (step, observed.state) {
                        (SwapStep::SubmitPreimage, LockState::Claimed { tx_hash, .. }) => {
                            Reconciled::Happened(StepOutput::PreimageSubmitted { tx_hash })
                        }
                        (SwapStep::Refund, LockState::Refunded { tx_hash }) => {
                            Reconciled::Happened(StepOutput::Refunded { tx_hash })
                        }
                        _ => Reconciled::NotHappened,
                    }
                }
            },
        };
        tracing::debug!(swap_id = %swap.swap_id, %step, ?reconciled, "reconciled");
        Ok(reconciled)
    }

    /// Pick up a lock that was refunded or claimed on chain outside this
    /// swap's own steps. `None` while the lock is still open.
    pub(crate) async fn adopt_closed_lock(&self, swap: &Swap) -> Result<Option<StepOutcome>, EngineError> {
        let Some(contract_ref) = swap.htlc_contract_ref.as_deref() else {
            return Ok(None);
        };
        let observed = self.ctx.capabilities.contract.lock_status(contract_ref).await?;
        match observed.state {
            LockState::Locked { .. } => Ok(None),
            LockState::Refunded { tx_hash } => {
                if !matches!(swap.status, SwapStatus::Pending | SwapStatus::HtlcLocked) {
                    return Ok(None);
                }
                tracing::warn!(swap_id = %swap.swap_id, %tx_hash, "lock already refunded on chain");
                let output = StepOutput::Refunded { tx_hash };
                self.record_observed(swap, SwapStep::Refund, &output).await?;
                self.apply(swap, SwapStep::Refund, output).await.map(Some)
            }
            LockState::Claimed { tx_hash, .. } => {
                self.adopt_claim(swap.clone(), tx_hash).await.map(Some)
            }
        }
    }

    /// Fold a step's upstream result into the swap record.
    ///
    /// A result that no longer fits the current status was already applied.
    pub(crate) async fn apply(
        &self,
        swap: &Swap,
        step: SwapStep,
        output: StepOutput,
    ) -> Result<StepOutcome, EngineError> {
        let ctx = &self.ctx;
        let now = ctx.now();
        let swap_id = swap.swap_id;

        match output {
            StepOutput::InvoiceIssued {
                invoice,
                payment_hash,
                expires_at,
            } => {
                if swap.status != SwapStatus::Pending || swap.payment_hash.is_some() {
                    return Ok(StepOutcome::Done);
                }
                let next = swap.advance(SwapEvent::InvoiceAttached, now, |s| {
                    s.payment_invoice = Some(invoice);
                    s.payment_hash = Some(payment_hash);
                    s.invoice_expires_at = Some(expires_at);
                    s.last_error = None;
                })?;
                ctx.commit(swap, next).await?;
                ctx.enqueue_step(swap_id, SwapStep::LockHtlc)?;
            }
            StepOutput::LockCreated {
                contract_ref,
                tx_hash,
            } => {
                if swap.status != SwapStatus::Pending {
                    return Ok(StepOutcome::Done);
                }
                let next = swap.advance(SwapEvent::HtlcLocked, now, |s| {
                    s.htlc_contract_ref = Some(contract_ref);
                    s.htlc_tx_hash = Some(tx_hash);
                    s.htlc_confirmations = 0;
                    s.last_error = None;
                })?;
                ctx.commit(swap, next).await?;
            }
            StepOutput::InvoicePaid { preimage, tx_id } => {
                if swap.status != SwapStatus::HtlcLocked {
                    return Ok(StepOutcome::Done);
                }
                let next = swap.advance(SwapEvent::PaymentSettled, now, |s| {
                    s.preimage = Some(preimage);
                    s.payment_tx_id = Some(tx_id);
                    s.last_error = None;
                })?;
                ctx.commit(swap, next).await?;
                ctx.enqueue_step(swap_id, SwapStep::SubmitPreimage)?;
            }
            StepOutput::PreimageSubmitted { tx_hash } => {
                if swap.status != SwapStatus::PaymentSettled {
                    return Ok(StepOutcome::Done);
                }
                let next = swap.advance(SwapEvent::PreimageSubmitted, now, |s| {
                    s.claim_tx_hash = Some(tx_hash);
                    s.last_error = None;
                })?;
                ctx.commit(swap, next).await?;
            }
            StepOutput::Refunded { tx_hash } => {
                if !matches!(swap.status, SwapStatus::Pending | SwapStatus::HtlcLocked) {
                    return Ok(StepOutcome::Done);
                }
                let next = swap.advance(SwapEvent::Refunded, now, |s| {
                    s.refund_tx_hash = Some(tx_hash);
                })?;
                ctx.commit(swap, next).await?;
            }
        }
        tracing::debug!(%swap_id, %step, "step output applied");
        Ok(StepOutcome::Done)
    }
}
