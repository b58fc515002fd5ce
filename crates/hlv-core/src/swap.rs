//! The swap record.
//!
//! A `Swap` is an immutable value snapshot: every change produces a new value
//! derived from the prior one through [`Swap::advance`] or [`Swap::annotate`],
//! and the ledger accepts it only if [`Swap::check_successor`] passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::state_machine::{SwapEvent, SwapStateMachine, SwapStatus};
use crate::types::{PaymentHash, Preimage, SwapDirection, SwapId};

/// Parameters for a freshly created swap.
#[derive(Debug, Clone)]
pub struct NewSwap {
    pub direction: SwapDirection,
    /// Chain-leg amount in 18-decimal base units.
    pub htlc_amount: u128,
    /// Payment-leg amount in satoshis.
    pub payment_amount: u64,
    /// Address of the HTLC contract.
    pub htlc_address: String,
    /// Party able to claim the HTLC with the preimage.
    pub htlc_recipient: String,
    pub timelock: DateTime<Utc>,
    pub user_address: String,
    pub agent_address: String,
    /// Counterparty-supplied invoice, already decoded.
    pub invoice: Option<AttachedInvoice>,
}

/// An invoice bound to a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedInvoice {
    pub invoice: String,
    pub payment_hash: PaymentHash,
    pub expires_at: DateTime<Utc>,
}

/// One atomic swap between the payment network and the HTLC chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub swap_id: SwapId,
    pub direction: SwapDirection,
    pub status: SwapStatus,

    pub payment_hash: Option<PaymentHash>,
    pub preimage: Option<Preimage>,

    // On-chain leg
    pub htlc_amount: u128,
    pub htlc_address: String,
    pub htlc_recipient: String,
    pub htlc_contract_ref: Option<String>,
    pub htlc_tx_hash: Option<String>,
    pub htlc_confirmations: u32,
    pub claim_tx_hash: Option<String>,
    pub claim_confirmations: u32,
    pub refund_tx_hash: Option<String>,
    pub timelock: DateTime<Utc>,

    // Off-chain leg
    pub payment_invoice: Option<String>,
    pub invoice_expires_at: Option<DateTime<Utc>>,
    pub payment_amount: u64,
    pub payment_tx_id: Option<String>,

    pub user_address: String,
    pub agent_address: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    /// Optimistic-concurrency version, bumped by the ledger on every write.
    pub version: u64,
}

impl Swap {
    /// Build the initial `Pending` record.
    pub fn new(params: NewSwap, now: DateTime<Utc>) -> Self {
        let (payment_invoice, payment_hash, invoice_expires_at) = match params.invoice {
            Some(inv) => (Some(inv.invoice), Some(inv.payment_hash), Some(inv.expires_at)),
            None => (None, None, None),
        };

        Self {
            swap_id: SwapId::new(),
            direction: params.direction,
            status: SwapStatus::Pending,
            payment_hash,
            preimage: None,
            htlc_amount: params.htlc_amount,
            htlc_address: params.htlc_address,
            htlc_recipient: params.htlc_recipient,
            htlc_contract_ref: None,
            htlc_tx_hash: None,
            htlc_confirmations: 0,
            claim_tx_hash: None,
            claim_confirmations: 0,
            refund_tx_hash: None,
            timelock: params.timelock,
            payment_invoice,
            invoice_expires_at,
            payment_amount: params.payment_amount,
            payment_tx_id: None,
            user_address: params.user_address,
            agent_address: params.agent_address,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
            version: 0,
        }
    }

    /// Derive the successor produced by `event`, applying `update` to the copy.
    ///
    /// The prior value is never touched.
    pub fn advance<F>(&self, event: SwapEvent, now: DateTime<Utc>, update: F) -> Result<Swap, CoreError>
    where
        F: FnOnce(&mut Swap),
    {
        let status = SwapStateMachine::transition(self.status, event)?;
        let mut next = self.clone();
        next.status = status;
        update(&mut next);
        next.updated_at = now;
        if status == SwapStatus::Completed && next.completed_at.is_none() {
            next.completed_at = Some(now);
        }
        Swap::check_successor(self, &next)?;
        Ok(next)
    }

    /// Derive a successor that keeps the status, applying `update` to the copy.
    pub fn amend<F>(&self, now: DateTime<Utc>, update: F) -> Result<Swap, CoreError>
    where
        F: FnOnce(&mut Swap),
    {
        let mut next = self.clone();
        update(&mut next);
        next.status = self.status;
        next.updated_at = now;
        Swap::check_successor(self, &next)?;
        Ok(next)
    }

    /// Derive a successor that keeps the status but records `last_error`.
    pub fn annotate(&self, error: impl Into<String>, now: DateTime<Utc>) -> Result<Swap, CoreError> {
        let error = error.into();
        self.amend(now, |s| s.last_error = Some(error))
    }

    /// Derive the `Failed` successor carrying `error`.
    pub fn fail(&self, error: impl Into<String>, now: DateTime<Utc>) -> Result<Swap, CoreError> {
        let error = error.into();
        self.advance(SwapEvent::Failed, now, |s| s.last_error = Some(error))
    }

    /// `preimage` present implies it hashes to `payment_hash`.
    pub fn verify_integrity(&self) -> Result<(), CoreError> {
        if let Some(preimage) = &self.preimage {
            let hash = self.payment_hash.ok_or_else(|| {
                CoreError::IntegrityViolation(format!(
                    "swap {} has a preimage but no payment hash",
                    self.swap_id
                ))
            })?;
            if !preimage.matches(&hash) {
                return Err(CoreError::IntegrityViolation(format!(
                    "preimage does not hash to payment hash {} for swap {}",
                    hash, self.swap_id
                )));
            }
        }
        Ok(())
    }

    /// Rules every stored successor must satisfy relative to its predecessor.
    pub fn check_successor(prior: &Swap, next: &Swap) -> Result<(), CoreError> {
        if prior.swap_id != next.swap_id {
            return Err(CoreError::IntegrityViolation(format!(
                "swap id changed from {} to {}",
                prior.swap_id, next.swap_id
            )));
        }
        if prior.status == next.status {
            if prior.status.is_terminal() {
                return Err(CoreError::InvalidStateTransition {
                    from: prior.status,
                    to: next.status,
                });
            }
        } else if !SwapStateMachine::is_valid_edge(prior.status, next.status) {
            return Err(CoreError::InvalidStateTransition {
                from: prior.status,
                to: next.status,
            });
        }
        if prior.payment_hash.is_some() && prior.payment_hash != next.payment_hash {
            return Err(CoreError::IntegrityViolation(format!(
                "payment hash of swap {} is immutable once set",
                prior.swap_id
            )));
        }
        if prior.preimage.is_some() && prior.preimage != next.preimage {
            return Err(CoreError::IntegrityViolation(format!(
                "preimage of swap {} is immutable once set",
                prior.swap_id
            )));
        }
        next.verify_integrity()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the timelock has passed at `now`.
    pub fn timelock_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.timelock
    }

    pub fn lock_confirmed(&self, depth: u32) -> bool {
        self.htlc_contract_ref.is_some() && self.htlc_confirmations >= depth
    }
}
