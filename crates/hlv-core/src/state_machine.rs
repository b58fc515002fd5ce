use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The lifecycle states of an atomic swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    /// Swap recorded; invoice may or may not be attached yet.
    Pending,
    /// HTLC created on the contract chain with the swap's payment hash.
    HtlcLocked,
    /// Invoice paid on the payment network; preimage captured.
    PaymentSettled,
    /// Preimage submitted to the HTLC contract; awaiting claim confirmation.
    PreimageSubmitted,
    /// Claim confirmed at policy depth. Final state.
    Completed,
    /// Unrecoverable error. Final state.
    Failed,
    /// HTLC refunded after the timelock elapsed. Final state.
    Refunded,
    /// Abandoned before any funds were locked. Final state.
    Cancelled,
}

impl SwapStatus {
    pub const ALL: [SwapStatus; 8] = [
        Self::Pending,
        Self::HtlcLocked,
        Self::PaymentSettled,
        Self::PreimageSubmitted,
        Self::Completed,
        Self::Failed,
        Self::Refunded,
        Self::Cancelled,
    ];

    /// Whether this is a final (terminal) state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Refunded | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::HtlcLocked => "htlc_locked",
            Self::PaymentSettled => "payment_settled",
            Self::PreimageSubmitted => "preimage_submitted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown swap status: {}", s)))
    }
}

/// Events that trigger swap status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapEvent {
    /// An invoice was issued or decoded and attached to the swap.
    InvoiceAttached,
    /// The HTLC was created on chain.
    HtlcLocked,
    /// The HTLC was observed at some confirmation depth.
    HtlcConfirmed,
    /// The invoice was paid and the preimage captured.
    PaymentSettled,
    /// The preimage was submitted to the contract.
    PreimageSubmitted,
    /// The claim was confirmed at policy depth.
    ClaimConfirmed,
    /// The HTLC was refunded after the timelock elapsed.
    Refunded,
    /// The swap was cancelled before anything was locked.
    Cancelled,
    /// Unrecoverable error or integrity violation.
    Failed,
}

impl SwapEvent {
    const ALL: [SwapEvent; 9] = [
        Self::InvoiceAttached,
        Self::HtlcLocked,
        Self::HtlcConfirmed,
        Self::PaymentSettled,
        Self::PreimageSubmitted,
        Self::ClaimConfirmed,
        Self::Refunded,
        Self::Cancelled,
        Self::Failed,
    ];

    fn nominal_target(&self, current: SwapStatus) -> SwapStatus {
        match self {
            Self::InvoiceAttached => SwapStatus::Pending,
            Self::HtlcLocked | Self::HtlcConfirmed => SwapStatus::HtlcLocked,
            Self::PaymentSettled => SwapStatus::PaymentSettled,
            Self::PreimageSubmitted => SwapStatus::PreimageSubmitted,
            Self::ClaimConfirmed => SwapStatus::Completed,
            Self::Refunded => SwapStatus::Refunded,
            Self::Cancelled => SwapStatus::Cancelled,
            Self::Failed if current.is_terminal() => current,
            Self::Failed => SwapStatus::Failed,
        }
    }
}

/// Swap status transitions.
///
/// Valid transitions:
/// - Pending → Pending (InvoiceAttached)
/// - Pending → HtlcLocked (HtlcLocked)
/// - HtlcLocked → HtlcLocked (HtlcConfirmed)
/// - HtlcLocked → PaymentSettled (PaymentSettled)
/// - PaymentSettled → PreimageSubmitted (PreimageSubmitted)
/// - PreimageSubmitted → Completed (ClaimConfirmed)
/// - Pending | HtlcLocked → Refunded (Refunded)
/// - Pending → Cancelled (Cancelled)
/// - any non-terminal → Failed (Failed)
pub struct SwapStateMachine;

impl SwapStateMachine {
    /// Attempt a state transition based on an event.
    /// Returns the new state on success, or an error for invalid transitions.
    pub fn transition(current: SwapStatus, event: SwapEvent) -> Result<SwapStatus, CoreError> {
        use SwapStatus::*;

        let new_state = match (current, event) {
            (Pending, SwapEvent::InvoiceAttached) => Pending,
            (Pending, SwapEvent::HtlcLocked) => HtlcLocked,
            (Pending, SwapEvent::Cancelled) => Cancelled,
            (Pending, SwapEvent::Refunded) => Refunded,

            (HtlcLocked, SwapEvent::HtlcConfirmed) => HtlcLocked,
            (HtlcLocked, SwapEvent::PaymentSettled) => PaymentSettled,
            (HtlcLocked, SwapEvent::Refunded) => Refunded,

            (PaymentSettled, SwapEvent::PreimageSubmitted) => PreimageSubmitted,

            (PreimageSubmitted, SwapEvent::ClaimConfirmed) => Completed,

            (s, SwapEvent::Failed) if !s.is_terminal() => Failed,

            _ => {
                return Err(CoreError::InvalidStateTransition {
                    from: current,
                    to: event.nominal_target(current),
                });
            }
        };

        tracing::debug!(
            from = %current,
            to = %new_state,
            event = ?event,
            "swap state transition"
        );

        Ok(new_state)
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: SwapStatus, event: SwapEvent) -> bool {
        Self::transition(current, event).is_ok()
    }

    /// Whether some event moves `from` to `to`.
    pub fn is_valid_edge(from: SwapStatus, to: SwapStatus) -> bool {
        SwapEvent::ALL
            .iter()
            .any(|event| matches!(Self::transition(from, *event), Ok(next) if next == to))
    }
}
