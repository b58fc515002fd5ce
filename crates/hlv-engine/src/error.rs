use hlv_core::{CoreError, SwapId};
use hlv_ledger::LedgerError;
use hlv_providers::ProviderError;
use hlv_scheduler::SchedulerError;
use std::fmt;

/// How an error is handled, independent of where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed request, rejected before any side effect.
    Validation,
    /// A guard is not met; nothing happened, retry later.
    Precondition,
    /// RPC, network or storage hiccup; retried with backoff.
    TransientProvider,
    /// The upstream effect is unknown; reconcile before retrying.
    PartialExecution,
    /// Corrupt or contradictory data; the swap is failed.
    IntegrityViolation,
    /// A timelock passed; the refund or cancel path takes over.
    Expiry,
    /// The provider refused for good; the swap is failed.
    Unrecoverable,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Precondition | Self::TransientProvider | Self::PartialExecution
        )
    }

    /// Whether the owning swap must be driven to `Failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation | Self::Expiry | Self::Unrecoverable
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Precondition => "precondition",
            Self::TransientProvider => "transient_provider",
            Self::PartialExecution => "partial_execution",
            Self::IntegrityViolation => "integrity_violation",
            Self::Expiry => "expiry",
            Self::Unrecoverable => "unrecoverable",
        };
        f.write_str(s)
    }
}

/// Orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("precondition not met: {0}")]
    Precondition(String),

    #[error("swap not found: {0}")]
    NotFound(SwapId),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) | CoreError::InvalidAmount(msg) | CoreError::InvalidHex(msg) => {
                Self::Validation(msg)
            }
            CoreError::IntegrityViolation(msg) => Self::Integrity(msg),
            other @ CoreError::InvalidStateTransition { .. } => Self::Precondition(other.to_string()),
        }
    }
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::NotFound(_) => ErrorClass::Validation,
            Self::Precondition(_) => ErrorClass::Precondition,
            Self::Integrity(_) => ErrorClass::IntegrityViolation,
            Self::Expired(_) => ErrorClass::Expiry,
            Self::Provider(e) => match e {
                ProviderError::Precondition(_) => ErrorClass::Precondition,
                ProviderError::Transient(_) => ErrorClass::TransientProvider,
                ProviderError::Timeout(_) => ErrorClass::PartialExecution,
                ProviderError::InvalidInvoice(_) => ErrorClass::Validation,
                ProviderError::Rejected(_) | ProviderError::NotFound(_) => ErrorClass::Unrecoverable,
            },
            Self::Ledger(e) => match e {
                LedgerError::NotFound(_) | LedgerError::AlreadyExists(_) => ErrorClass::Validation,
                LedgerError::Conflict { .. } | LedgerError::Storage(_) => ErrorClass::TransientProvider,
                LedgerError::InvalidTransition { .. } => ErrorClass::Precondition,
                LedgerError::DuplicatePaymentHash { .. } | LedgerError::Integrity(_) => {
                    ErrorClass::IntegrityViolation
                }
            },
            Self::Scheduler(_) => ErrorClass::TransientProvider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlv_core::SwapStatus;
    use std::time::Duration;

    #[test]
    fn test_provider_classes() {
        let timeout = EngineError::from(ProviderError::Timeout(Duration::from_secs(30)));
        assert_eq!(timeout.class(), ErrorClass::PartialExecution);
        assert!(timeout.class().is_retryable());

        let rejected = EngineError::from(ProviderError::Rejected("no route".into()));
        assert_eq!(rejected.class(), ErrorClass::Unrecoverable);
        assert!(rejected.class().is_fatal());
    }

    #[test]
    fn test_ledger_classes() {
        let conflict = EngineError::from(LedgerError::Conflict {
            swap_id: SwapId::new(),
            expected: SwapStatus::Pending,
            expected_version: 0,
            actual: SwapStatus::Cancelled,
            actual_version: 1,
        });
        assert_eq!(conflict.class(), ErrorClass::TransientProvider);

        let integrity = EngineError::from(LedgerError::Integrity("bad preimage".into()));
        assert!(integrity.class().is_fatal());
    }

    #[test]
    fn test_core_amount_error_is_validation() {
        let err = EngineError::from(CoreError::InvalidAmount("negative".into()));
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(!err.class().is_retryable());
    }
}
