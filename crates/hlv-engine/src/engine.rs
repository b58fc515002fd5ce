use chrono::{DateTime, Utc};
use hlv_core::SwapId;

use crate::context::SwapContext;
use crate::error::{EngineError, ErrorClass};

/// What the worker should do with the job that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Finished, or no longer applicable. Release the job.
    Done,
    /// A guard is not yet met; run again at the given instant without
    /// spending an attempt.
    Deferred(DateTime<Utc>),
    /// Retryable failure; back off and try again.
    Retry(String),
    /// The upstream effect is unknown. The lease is left to lapse so the
    /// next claim reconciles before acting.
    Partial(String),
}

/// The swap state machine: the only writer of swap status.
///
/// Step execution lives in `executor`, watcher events and commands in
/// `events`.
#[derive(Debug, Clone)]
pub struct SwapEngine {
    pub(crate) ctx: SwapContext,
}

impl SwapEngine {
    pub fn new(ctx: SwapContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SwapContext {
        &self.ctx
    }

    /// Route an error raised while acting on `swap_id` by its class.
    pub(crate) async fn settle_error(
        &self,
        swap_id: SwapId,
        what: &str,
        err: EngineError,
    ) -> Result<StepOutcome, EngineError> {
        let class = err.class();
        match class {
            ErrorClass::TransientProvider | ErrorClass::PartialExecution => {
                tracing::warn!(%swap_id, what, error = %err, %class, "retryable failure");
                Ok(StepOutcome::Retry(err.to_string()))
            }
            ErrorClass::Precondition => {
                tracing::info!(%swap_id, what, error = %err, "precondition not met");
                if let Some(swap) = self.ctx.ledger.get(swap_id).await? {
                    if !swap.is_terminal() {
                        if let Err(e) = self.ctx.annotate(&swap, format!("{}: {}", what, err)).await {
                            tracing::debug!(%swap_id, error = %e, "could not record precondition");
                        }
                    }
                }
                Ok(StepOutcome::Retry(err.to_string()))
            }
            ErrorClass::Validation
            | ErrorClass::IntegrityViolation
            | ErrorClass::Expiry
            | ErrorClass::Unrecoverable => {
                let Some(swap) = self.ctx.ledger.get(swap_id).await? else {
                    tracing::warn!(%swap_id, what, error = %err, "error for unknown swap dropped");
                    return Ok(StepOutcome::Done);
                };
                if !swap.is_terminal() {
                    self.ctx.fail_swap(&swap, format!("{}: {}", what, err)).await?;
                }
                Ok(StepOutcome::Done)
            }
        }
    }
}
