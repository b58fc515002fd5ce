use std::time::Duration;

/// Capability-provider errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// `precheck` found the action cannot be taken yet. Nothing happened upstream.
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// RPC or network failure before the action reached the provider.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The call did not return in time; the upstream effect is unknown.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider definitively refused the action.
    #[error("rejected by provider: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Precondition(_) | Self::Transient(_) | Self::Timeout(_)
        )
    }

    /// Whether the upstream action may have partially taken effect.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
