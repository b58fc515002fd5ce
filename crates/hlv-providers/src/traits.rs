use async_trait::async_trait;
use hlv_core::{PaymentHash, Preimage};
use std::sync::Arc;

use crate::error::ProviderError;
use crate::types::{
    DecodedInvoice, InvoiceRequest, IssuedInvoice, LockObservation, LockReceipt, LockRequest,
    PaymentLookup, PaymentReceipt, TxReceipt,
};

/// Payment-network capability.
///
/// Each implementation bridges to a concrete payment channel network node
/// or wallet connection.
#[async_trait]
pub trait IPaymentProvider: Send + Sync {
    /// Extract payment hash, amount and expiry from an encoded invoice.
    async fn decode_invoice(&self, invoice: &str) -> Result<DecodedInvoice, ProviderError>;

    /// Side-effect-free validation of an invoice request.
    async fn precheck_create_invoice(&self, request: &InvoiceRequest) -> Result<(), ProviderError>;

    /// Issue a new invoice.
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<IssuedInvoice, ProviderError>;

    /// Side-effect-free validation that `invoice` can be paid for `expected_amount` sats.
    async fn precheck_pay_invoice(
        &self,
        invoice: &str,
        expected_amount: u64,
    ) -> Result<(), ProviderError>;

    /// Pay an invoice and return the preimage revealed by the payee.
    async fn pay_invoice(
        &self,
        invoice: &str,
        expected_amount: u64,
    ) -> Result<PaymentReceipt, ProviderError>;

    /// Actual state of any payment for `payment_hash` made by this node.
    async fn lookup_payment(&self, payment_hash: &PaymentHash) -> Result<PaymentLookup, ProviderError>;

    /// Return the unique identifier of this provider (e.g. "pn-internal").
    fn provider_id(&self) -> &str;
}

/// HTLC-contract capability.
#[async_trait]
pub trait IContractProvider: Send + Sync {
    /// Side-effect-free validation of a lock request.
    async fn precheck_lock(&self, request: &LockRequest) -> Result<(), ProviderError>;

    /// Create an HTLC locked to `request.payment_hash`.
    async fn create_lock(&self, request: LockRequest) -> Result<LockReceipt, ProviderError>;

    /// Side-effect-free validation that `preimage` can claim `contract_ref`.
    async fn precheck_claim(&self, contract_ref: &str, preimage: &Preimage) -> Result<(), ProviderError>;

    /// Claim the HTLC by revealing the preimage.
    async fn submit_preimage(
        &self,
        contract_ref: &str,
        preimage: Preimage,
    ) -> Result<TxReceipt, ProviderError>;

    /// Side-effect-free validation that `contract_ref` is refundable now.
    async fn precheck_refund(&self, contract_ref: &str) -> Result<(), ProviderError>;

    /// Return the locked funds to the sender after the timelock.
    async fn refund(&self, contract_ref: &str) -> Result<TxReceipt, ProviderError>;

    /// Current on-chain state of an HTLC, re-read on every call.
    async fn lock_status(&self, contract_ref: &str) -> Result<LockObservation, ProviderError>;

    /// Find an HTLC by payment hash, for reconciling a lock whose creation
    /// outcome is unknown.
    async fn find_lock(&self, payment_hash: &PaymentHash) -> Result<Option<LockObservation>, ProviderError>;

    /// Return the unique identifier of this provider (e.g. "htlc-internal").
    fn provider_id(&self) -> &str;
}

/// The capability instances injected into the state machine.
#[derive(Clone)]
pub struct Capabilities {
    pub payment: Arc<dyn IPaymentProvider>,
    pub contract: Arc<dyn IContractProvider>,
}

impl Capabilities {
    pub fn new(payment: Arc<dyn IPaymentProvider>, contract: Arc<dyn IContractProvider>) -> Self {
        Self { payment, contract }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("payment", &self.payment.provider_id())
            .field("contract", &self.contract.provider_id())
            .finish()
    }
}
