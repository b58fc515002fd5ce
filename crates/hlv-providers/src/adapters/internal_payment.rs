use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use hlv_core::{Clock, PaymentHash, Preimage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::traits::IPaymentProvider;
use crate::types::{
    DecodedInvoice, InvoiceRequest, IssuedInvoice, PaymentLookup, PaymentReceipt,
};

const INVOICE_PREFIX: &str = "lnhlv1";

/// An invoice known to the simulated network.
struct InvoiceEntry {
    amount_sats: u64,
    expires_at: DateTime<Utc>,
    preimage: Preimage,
    paid: bool,
}

/// In-process payment channel network.
///
/// Every invoice is issued by this network, so paying one reveals the
/// preimage held by the issuer. Invoices encode amount, hash and expiry as
/// `lnhlv1<sats>p<hash>x<unix-expiry>`.
pub struct InternalPaymentNetwork {
    clock: Arc<dyn Clock>,
    invoices: DashMap<PaymentHash, InvoiceEntry>,
    /// Outgoing payments made through this node, keyed by payment hash.
    payments: DashMap<PaymentHash, PaymentLookup>,
    /// Applied after a payment settles, before `pay_invoice` returns.
    pay_delay: Mutex<Option<Duration>>,
    /// New payments stop short of settling until released.
    hold_in_flight: AtomicBool,
    in_flight: DashMap<PaymentHash, PaymentReceipt>,
    /// Consumed one per `execute` call, before any effect.
    injected: Mutex<VecDeque<ProviderError>>,
    offline: AtomicBool,
    create_calls: AtomicU32,
    pay_calls: AtomicU32,
}

impl InternalPaymentNetwork {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            invoices: DashMap::new(),
            payments: DashMap::new(),
            pay_delay: Mutex::new(None),
            hold_in_flight: AtomicBool::new(false),
            in_flight: DashMap::new(),
            injected: Mutex::new(VecDeque::new()),
            offline: AtomicBool::new(false),
            create_calls: AtomicU32::new(0),
            pay_calls: AtomicU32::new(0),
        }
    }

    pub fn encode_invoice(amount_sats: u64, hash: &PaymentHash, expires_at: DateTime<Utc>) -> String {
        format!(
            "{}{}p{}x{}",
            INVOICE_PREFIX,
            amount_sats,
            hash.to_hex(),
            expires_at.timestamp()
        )
    }

    fn parse_invoice(invoice: &str) -> Result<DecodedInvoice, ProviderError> {
        let bad = |why: &str| ProviderError::InvalidInvoice(format!("{}: {}", why, invoice));

        let body = invoice
            .strip_prefix(INVOICE_PREFIX)
            .ok_or_else(|| bad("unknown prefix"))?;
        let (amount, rest) = body.split_once('p').ok_or_else(|| bad("missing hash"))?;
        let (hash, expiry) = rest.split_once('x').ok_or_else(|| bad("missing expiry"))?;

        let amount_sats: u64 = amount.parse().map_err(|_| bad("bad amount"))?;
        if amount_sats == 0 {
            return Err(bad("zero amount"));
        }
        let payment_hash = PaymentHash::from_hex(hash).map_err(|_| bad("bad payment hash"))?;
        let expiry: i64 = expiry.parse().map_err(|_| bad("bad expiry"))?;
        let expires_at = Utc
            .timestamp_opt(expiry, 0)
            .single()
            .ok_or_else(|| bad("expiry out of range"))?;

        Ok(DecodedInvoice {
            payment_hash,
            amount_sats,
            expires_at,
        })
    }

    /// Delay every successful `pay_invoice` response by `delay`.
    pub fn set_pay_delay(&self, delay: Option<Duration>) {
        *self.pay_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Leave every new payment in flight until [`Self::settle_in_flight`].
    ///
    /// `pay_invoice` does not return while its payment is held.
    pub fn set_hold_in_flight(&self, hold: bool) {
        self.hold_in_flight.store(hold, Ordering::SeqCst);
    }

    /// Settle every held payment. Returns how many there were.
    pub fn settle_in_flight(&self) -> usize {
        self.hold_in_flight.store(false, Ordering::SeqCst);
        let held: Vec<(PaymentHash, PaymentReceipt)> = self
            .in_flight
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (hash, receipt) in &held {
            self.payments.insert(
                *hash,
                PaymentLookup::Settled {
                    preimage: receipt.preimage.clone(),
                    tx_id: receipt.tx_id.clone(),
                },
            );
            self.in_flight.remove(hash);
            tracing::info!(payment_hash = %hash, "held payment settled");
        }
        held.len()
    }

    /// Make the next `execute` call fail with `error` before any effect.
    pub fn inject_failure(&self, error: ProviderError) {
        self.injected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Make every call, including lookups, fail as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn pay_calls(&self) -> u32 {
        self.pay_calls.load(Ordering::SeqCst)
    }

    /// The preimage behind an issued invoice, as the payee would know it.
    pub fn preimage_for(&self, hash: &PaymentHash) -> Option<Preimage> {
        self.invoices.get(hash).map(|entry| entry.preimage.clone())
    }

    fn ensure_online(&self) -> Result<(), ProviderError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("payment node unreachable".into()));
        }
        Ok(())
    }

    fn take_injected(&self) -> Result<(), ProviderError> {
        let next = self
            .injected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_payable(&self, decoded: &DecodedInvoice, expected_amount: u64) -> Result<(), ProviderError> {
        if decoded.amount_sats != expected_amount {
            return Err(ProviderError::Rejected(format!(
                "invoice amount {} sats does not match expected {} sats",
                decoded.amount_sats, expected_amount
            )));
        }
        if self.clock.now() >= decoded.expires_at {
            return Err(ProviderError::Rejected("invoice expired".into()));
        }
        let entry = self
            .invoices
            .get(&decoded.payment_hash)
            .ok_or_else(|| ProviderError::Rejected("no route to payee".into()))?;
        if entry.paid {
            return Err(ProviderError::Rejected("invoice already paid".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IPaymentProvider for InternalPaymentNetwork {
    async fn decode_invoice(&self, invoice: &str) -> Result<DecodedInvoice, ProviderError> {
        Self::parse_invoice(invoice)
    }

    async fn precheck_create_invoice(&self, request: &InvoiceRequest) -> Result<(), ProviderError> {
        self.ensure_online()?;
        if request.amount_sats == 0 {
            return Err(ProviderError::Precondition("invoice amount must be positive".into()));
        }
        if request.expiry_secs <= 0 {
            return Err(ProviderError::Precondition("invoice expiry must be positive".into()));
        }
        Ok(())
    }

    async fn create_invoice(&self, request: InvoiceRequest) -> Result<IssuedInvoice, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.take_injected()?;
        self.precheck_create_invoice(&request).await?;

        let preimage = Preimage::random();
        let payment_hash = preimage.payment_hash();
        let expires_at = self.clock.now() + ChronoDuration::seconds(request.expiry_secs);
        let invoice = Self::encode_invoice(request.amount_sats, &payment_hash, expires_at);

        self.invoices.insert(
            payment_hash,
            InvoiceEntry {
                amount_sats: request.amount_sats,
                expires_at,
                preimage,
                paid: false,
            },
        );
        tracing::info!(
            payment_hash = %payment_hash,
            amount_sats = request.amount_sats,
            "internal invoice issued"
        );

        Ok(IssuedInvoice {
            payment_hash,
            invoice,
            expires_at,
        })
    }

    async fn precheck_pay_invoice(
        &self,
        invoice: &str,
        expected_amount: u64,
    ) -> Result<(), ProviderError> {
        self.ensure_online()?;
        let decoded = Self::parse_invoice(invoice)?;
        self.check_payable(&decoded, expected_amount)
    }

    async fn pay_invoice(
        &self,
        invoice: &str,
        expected_amount: u64,
    ) -> Result<PaymentReceipt, ProviderError> {
        self.pay_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.take_injected()?;

        let decoded = Self::parse_invoice(invoice)?;
        let receipt = {
            let mut entry = self
                .invoices
                .get_mut(&decoded.payment_hash)
                .ok_or_else(|| ProviderError::Rejected("no route to payee".into()))?;
            if entry.amount_sats != expected_amount {
                return Err(ProviderError::Rejected(format!(
                    "invoice amount {} sats does not match expected {} sats",
                    entry.amount_sats, expected_amount
                )));
            }
            if self.clock.now() >= entry.expires_at {
                return Err(ProviderError::Rejected("invoice expired".into()));
            }
            if entry.paid {
                return Err(ProviderError::Rejected("invoice already paid".into()));
            }
            entry.paid = true;
            PaymentReceipt {
                preimage: entry.preimage.clone(),
                tx_id: format!("ln-{}", Uuid::now_v7()),
            }
        };

        if self.hold_in_flight.load(Ordering::SeqCst) {
            self.payments.insert(decoded.payment_hash, PaymentLookup::InFlight);
            self.in_flight.insert(decoded.payment_hash, receipt.clone());
            tracing::info!(payment_hash = %decoded.payment_hash, "internal payment in flight");
            while self.in_flight.contains_key(&decoded.payment_hash) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        self.payments.insert(
            decoded.payment_hash,
            PaymentLookup::Settled {
                preimage: receipt.preimage.clone(),
                tx_id: receipt.tx_id.clone(),
            },
        );
        tracing::info!(payment_hash = %decoded.payment_hash, "internal invoice paid");

        let delay = *self.pay_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(receipt)
    }

    async fn lookup_payment(&self, payment_hash: &PaymentHash) -> Result<PaymentLookup, ProviderError> {
        self.ensure_online()?;
        Ok(self
            .payments
            .get(payment_hash)
            .map(|p| p.clone())
            .unwrap_or(PaymentLookup::Unknown))
    }

    fn provider_id(&self) -> &str {
        "pn-internal"
    }
}
