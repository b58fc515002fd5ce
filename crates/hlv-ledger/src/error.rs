use hlv_core::{CoreError, PaymentHash, SwapId, SwapStatus};

/// Ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("swap not found: {0}")]
    NotFound(SwapId),

    #[error("swap already exists: {0}")]
    AlreadyExists(SwapId),

    #[error("payment hash {hash} already bound to active swap {existing}")]
    DuplicatePaymentHash { hash: PaymentHash, existing: SwapId },

    #[error("compare-and-set conflict on swap {swap_id}: expected {expected} v{expected_version}, found {actual} v{actual_version}")]
    Conflict {
        swap_id: SwapId,
        expected: SwapStatus,
        expected_version: u64,
        actual: SwapStatus,
        actual_version: u64,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: SwapStatus, to: SwapStatus },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CoreError> for LedgerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidStateTransition { from, to } => Self::InvalidTransition { from, to },
            CoreError::IntegrityViolation(msg) => Self::Integrity(msg),
            other => Self::Integrity(other.to_string()),
        }
    }
}
