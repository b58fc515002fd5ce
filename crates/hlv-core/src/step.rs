//! Side-effecting steps of a swap and their idempotency records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PaymentHash, Preimage, SwapId};

/// A side-effecting step driven by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStep {
    CreateInvoice,
    LockHtlc,
    PayInvoice,
    SubmitPreimage,
    Refund,
}

impl SwapStep {
    pub const ALL: [SwapStep; 5] = [
        Self::CreateInvoice,
        Self::LockHtlc,
        Self::PayInvoice,
        Self::SubmitPreimage,
        Self::Refund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateInvoice => "create_invoice",
            Self::LockHtlc => "lock_htlc",
            Self::PayInvoice => "pay_invoice",
            Self::SubmitPreimage => "submit_preimage",
            Self::Refund => "refund",
        }
    }

    /// Steps racing against the timelock are dispatched first.
    pub fn is_safety_critical(&self) -> bool {
        matches!(self, Self::Refund | Self::SubmitPreimage)
    }
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a successful step produced upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    InvoiceIssued {
        invoice: String,
        payment_hash: PaymentHash,
        expires_at: DateTime<Utc>,
    },
    LockCreated {
        contract_ref: String,
        tx_hash: String,
    },
    InvoicePaid {
        preimage: Preimage,
        tx_id: String,
    },
    PreimageSubmitted {
        tx_hash: String,
    },
    Refunded {
        tx_hash: String,
    },
}

/// Progress of one `(swap_id, step)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    /// `execute` was issued; outcome not yet recorded.
    Started,
    /// `execute` returned ambiguously (timeout, lost response).
    Partial { reason: String },
    /// Upstream effect confirmed; the output is authoritative.
    Succeeded { output: StepOutput },
    /// Upstream definitively rejected the action.
    Failed { reason: String },
}

/// Idempotency record keyed by `(swap_id, step)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub swap_id: SwapId,
    pub step: SwapStep,
    pub state: StepState,
    /// Number of `execute` calls issued so far.
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn started(swap_id: SwapId, step: SwapStep, attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            swap_id,
            step,
            state: StepState::Started,
            attempts,
            updated_at: now,
        }
    }

    pub fn with_state(&self, state: StepState, now: DateTime<Utc>) -> Self {
        Self {
            state,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn output(&self) -> Option<&StepOutput> {
        match &self.state {
            StepState::Succeeded { output } => Some(output),
            _ => None,
        }
    }

    /// Whether an earlier `execute` may have had an upstream effect.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self.state, StepState::Started | StepState::Partial { .. })
    }
}
