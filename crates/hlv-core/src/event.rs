//! Normalized events observed on the chain and the payment network.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Preimage;

/// What the chain watcher saw for one swap on one poll.
///
/// Events are candidates only: the state machine re-reads the swap and
/// decides whether each one still applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    /// An HTLC locked to the swap's payment hash exists on chain.
    HtlcCreated { contract_ref: String, tx_hash: String },
    /// The HTLC was seen at `confirmations` depth on this poll.
    HtlcConfirmed { confirmations: u32 },
    /// The payment network reports the invoice paid.
    PaymentSettled { preimage: Preimage, tx_id: String },
    /// The timelock passed before the payment settled.
    TimelockElapsed,
    /// The HTLC was refunded on chain, possibly by another party.
    HtlcRefunded { tx_hash: String },
    /// The HTLC was claimed on chain before the swap recorded a claim.
    HtlcClaimed { tx_hash: String },
    /// The claim transaction was seen at `confirmations` depth on this poll.
    ClaimConfirmed { confirmations: u32 },
}

impl WatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HtlcCreated { .. } => "htlc_created",
            Self::HtlcConfirmed { .. } => "htlc_confirmed",
            Self::PaymentSettled { .. } => "payment_settled",
            Self::TimelockElapsed => "timelock_elapsed",
            Self::HtlcRefunded { .. } => "htlc_refunded",
            Self::HtlcClaimed { .. } => "htlc_claimed",
            Self::ClaimConfirmed { .. } => "claim_confirmed",
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtlcConfirmed { confirmations } | Self::ClaimConfirmed { confirmations } => {
                write!(f, "{}({})", self.name(), confirmations)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}
