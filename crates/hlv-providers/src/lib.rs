//! HLV Capability Providers
//!
//! Narrow interfaces to the payment network (invoice issuance and payment)
//! and to the HTLC contract chain (lock, claim, refund), each split into a
//! side-effect-free `precheck` and an `execute` phase, plus reconciliation
//! queries used after ambiguous outcomes.

pub mod adapters;
pub mod error;
pub mod traits;
pub mod types;

pub use adapters::{InternalHtlcContract, InternalPaymentNetwork};
pub use error::ProviderError;
pub use traits::{Capabilities, IContractProvider, IPaymentProvider};
pub use types::{
    DecodedInvoice, InvoiceRequest, IssuedInvoice, LockObservation, LockReceipt, LockRequest, LockState,
    PaymentLookup, PaymentReceipt, TxReceipt,
};
