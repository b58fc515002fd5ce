use chrono::{DateTime, Utc};
use hlv_core::{PaymentHash, Preimage};
use serde::{Deserialize, Serialize};

/// Request for a new payment-network invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    pub amount_sats: u64,
    pub description: String,
    pub expiry_secs: i64,
    /// Opaque credential for the wallet issuing the invoice, when the
    /// invoice is issued on a user's behalf.
    pub credential: Option<String>,
}

/// Invoice returned by `create_invoice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedInvoice {
    pub payment_hash: PaymentHash,
    pub invoice: String,
    pub expires_at: DateTime<Utc>,
}

/// Fields extracted from an encoded invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInvoice {
    pub payment_hash: PaymentHash,
    pub amount_sats: u64,
    pub expires_at: DateTime<Utc>,
}

/// Proof that an invoice was paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub preimage: Preimage,
    pub tx_id: String,
}

/// Actual state of a payment, used for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentLookup {
    /// The provider has never seen a payment for this hash.
    Unknown,
    /// A payment left the signer but has not resolved.
    InFlight,
    Settled { preimage: Preimage, tx_id: String },
    Failed { reason: String },
}

/// Parameters for creating an HTLC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub payment_hash: PaymentHash,
    /// Amount in the chain token's base units.
    pub amount: u128,
    pub timelock: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
}

/// Result of `create_lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReceipt {
    pub contract_ref: String,
    pub tx_hash: String,
}

/// Result of a claim or refund transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
}

/// On-chain state of an HTLC as of the latest poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    Locked { confirmations: u32 },
    Claimed { confirmations: u32, tx_hash: String },
    Refunded { tx_hash: String },
}

/// An HTLC observed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockObservation {
    pub contract_ref: String,
    pub payment_hash: PaymentHash,
    pub create_tx_hash: String,
    pub timelock: DateTime<Utc>,
    pub state: LockState,
}
