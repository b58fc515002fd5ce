use crate::state_machine::SwapStatus;

/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: SwapStatus, to: SwapStatus },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}
