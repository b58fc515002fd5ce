//! In-process provider implementations.
//!
//! They simulate a payment channel network and an HTLC chain closely enough
//! (hash locks, time locks, confirmation depth, reorgs, slow responses) to
//! drive the orchestrator end to end without external services.

pub mod internal_contract;
pub mod internal_payment;

pub use internal_contract::InternalHtlcContract;
pub use internal_payment::InternalPaymentNetwork;
