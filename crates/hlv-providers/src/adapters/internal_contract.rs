use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hlv_core::{Clock, PaymentHash, Preimage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::traits::IContractProvider;
use crate::types::{LockObservation, LockReceipt, LockRequest, LockState, TxReceipt};

/// Lifecycle of a simulated HTLC.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HtlcStatus {
    Active,
    Claimed { tx_hash: String, included_at: u64 },
    Refunded { tx_hash: String },
}

impl std::fmt::Display for HtlcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Claimed { .. } => write!(f, "Claimed"),
            Self::Refunded { .. } => write!(f, "Refunded"),
        }
    }
}

#[derive(Debug, Clone)]
struct Htlc {
    contract_ref: String,
    payment_hash: PaymentHash,
    amount: u128,
    sender: String,
    recipient: String,
    timelock: DateTime<Utc>,
    create_tx_hash: String,
    /// Block height the creating transaction was mined at.
    included_at: u64,
    status: HtlcStatus,
}

/// In-process HTLC chain.
///
/// Locks are keyed by contract reference, guarded by a SHA-256 hash lock
/// and an absolute time lock read from the injected clock. Transactions
/// are mined in the block after submission; `mine_blocks` and `reorg`
/// move the chain tip so confirmation depth can rise and fall.
pub struct InternalHtlcContract {
    clock: Arc<dyn Clock>,
    htlcs: DashMap<String, Htlc>,
    height: AtomicU64,
    /// Applied after an `execute` call takes effect, before it returns.
    response_delay: Mutex<Option<Duration>>,
    injected: Mutex<VecDeque<ProviderError>>,
    offline: AtomicBool,
    lock_calls: AtomicU32,
    claim_calls: AtomicU32,
    refund_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl InternalHtlcContract {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            htlcs: DashMap::new(),
            height: AtomicU64::new(0),
            response_delay: Mutex::new(None),
            injected: Mutex::new(VecDeque::new()),
            offline: AtomicBool::new(false),
            lock_calls: AtomicU32::new(0),
            claim_calls: AtomicU32::new(0),
            refund_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    /// Advance the chain tip by `blocks`.
    pub fn mine_blocks(&self, blocks: u64) {
        let height = self.height.fetch_add(blocks, Ordering::SeqCst) + blocks;
        tracing::debug!(height, "internal chain advanced");
    }

    /// Drop the top `depth` blocks. Transactions mined in them lose their
    /// confirmations until the chain advances past them again.
    pub fn reorg(&self, depth: u64) {
        let _ = self
            .height
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| {
                Some(h.saturating_sub(depth))
            });
        tracing::warn!(depth, height = self.height(), "internal chain reorganised");
    }

    pub fn set_response_delay(&self, delay: Option<Duration>) {
        *self.response_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Make the next `execute` call fail with `error` before any effect.
    pub fn inject_failure(&self, error: ProviderError) {
        self.injected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Make every call, including status queries, fail as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn lock_calls(&self) -> u32 {
        self.lock_calls.load(Ordering::SeqCst)
    }

    pub fn claim_calls(&self) -> u32 {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// Total `lock_status` and `find_lock` queries served.
    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Locked amount and parties of an HTLC, for balance checks in tests.
    pub fn lock_terms(&self, contract_ref: &str) -> Option<(u128, String, String)> {
        self.htlcs
            .get(contract_ref)
            .map(|h| (h.amount, h.sender.clone(), h.recipient.clone()))
    }

    fn ensure_online(&self) -> Result<(), ProviderError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("chain rpc unreachable".into()));
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

    async fn respond(&self) {
        let delay = *self.response_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_tx_hash() -> String {
        format!("0x{}", hex::encode(Uuid::now_v7().as_bytes()))
    }

    fn confirmations(&self, included_at: u64) -> u32 {
        let height = self.height();
        if height < included_at {
            0
        } else {
            u32::try_from(height - included_at + 1).unwrap_or(u32::MAX)
        }
    }

    fn observe(&self, htlc: &Htlc) -> LockObservation {
        let state = match &htlc.status {
            HtlcStatus::Active => LockState::Locked {
                confirmations: self.confirmations(htlc.included_at),
            },
            HtlcStatus::Claimed {
                tx_hash,
                included_at,
            } => LockState::Claimed {
                confirmations: self.confirmations(*included_at),
                tx_hash: tx_hash.clone(),
            },
            HtlcStatus::Refunded { tx_hash } => LockState::Refunded {
                tx_hash: tx_hash.clone(),
            },
        };
        LockObservation {
            contract_ref: htlc.contract_ref.clone(),
            payment_hash: htlc.payment_hash,
            create_tx_hash: htlc.create_tx_hash.clone(),
            timelock: htlc.timelock,
            state,
        }
    }

    fn check_lock(&self, request: &LockRequest) -> Result<(), ProviderError> {
        if request.amount == 0 {
            return Err(ProviderError::Rejected("lock amount must be positive".into()));
        }
        if request.timelock <= self.clock.now() {
            return Err(ProviderError::Rejected("timelock already elapsed".into()));
        }
        if self
            .htlcs
            .iter()
            .any(|h| h.payment_hash == request.payment_hash)
        {
            return Err(ProviderError::Rejected(format!(
                "lock for payment hash {} already exists",
                request.payment_hash
            )));
        }
        Ok(())
    }

    fn check_claim(&self, htlc: &Htlc, preimage: &Preimage) -> Result<(), ProviderError> {
        if htlc.status != HtlcStatus::Active {
            return Err(ProviderError::Rejected(format!(
                "cannot claim HTLC in status {}",
                htlc.status
            )));
        }
        if self.clock.now() >= htlc.timelock {
            return Err(ProviderError::Rejected("HTLC expired".into()));
        }
        if !preimage.matches(&htlc.payment_hash) {
            return Err(ProviderError::Rejected("preimage does not match hash lock".into()));
        }
        Ok(())
    }

    fn check_refund(&self, htlc: &Htlc) -> Result<(), ProviderError> {
        if htlc.status != HtlcStatus::Active {
            return Err(ProviderError::Rejected(format!(
                "cannot refund HTLC in status {}",
                htlc.status
            )));
        }
        if self.clock.now() < htlc.timelock {
            return Err(ProviderError::Precondition("HTLC has not expired yet".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl IContractProvider for InternalHtlcContract {
    async fn precheck_lock(&self, request: &LockRequest) -> Result<(), ProviderError> {
        self.ensure_online()?;
        self.check_lock(request)
    }

    async fn create_lock(&self, request: LockRequest) -> Result<LockReceipt, ProviderError> {
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.take_injected()?;
        self.check_lock(&request)?;

        let htlc = Htlc {
            contract_ref: format!("htlc-{}", Uuid::now_v7()),
            payment_hash: request.payment_hash,
            amount: request.amount,
            sender: request.sender,
            recipient: request.recipient,
            timelock: request.timelock,
            create_tx_hash: Self::next_tx_hash(),
            included_at: self.height() + 1,
            status: HtlcStatus::Active,
        };
        let receipt = LockReceipt {
            contract_ref: htlc.contract_ref.clone(),
            tx_hash: htlc.create_tx_hash.clone(),
        };
        tracing::info!(
            contract_ref = %htlc.contract_ref,
            payment_hash = %htlc.payment_hash,
            "HTLC created"
        );
        self.htlcs.insert(htlc.contract_ref.clone(), htlc);

        self.respond().await;
        Ok(receipt)
    }

    async fn precheck_claim(&self, contract_ref: &str, preimage: &Preimage) -> Result<(), ProviderError> {
        self.ensure_online()?;
        let htlc = self
            .htlcs
            .get(contract_ref)
            .ok_or_else(|| ProviderError::NotFound(contract_ref.to_string()))?;
        self.check_claim(&htlc, preimage)
    }

    async fn submit_preimage(
        &self,
        contract_ref: &str,
        preimage: Preimage,
    ) -> Result<TxReceipt, ProviderError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.take_injected()?;

        let tx_hash = {
            let mut entry = self
                .htlcs
                .get_mut(contract_ref)
                .ok_or_else(|| ProviderError::NotFound(contract_ref.to_string()))?;
            self.check_claim(&entry, &preimage)?;
            let tx_hash = Self::next_tx_hash();
            entry.status = HtlcStatus::Claimed {
                tx_hash: tx_hash.clone(),
                included_at: self.height() + 1,
            };
            tx_hash
        };
        tracing::info!(contract_ref, "HTLC claimed");

        self.respond().await;
        Ok(TxReceipt { tx_hash })
    }

    async fn precheck_refund(&self, contract_ref: &str) -> Result<(), ProviderError> {
        self.ensure_online()?;
        let htlc = self
            .htlcs
            .get(contract_ref)
            .ok_or_else(|| ProviderError::NotFound(contract_ref.to_string()))?;
        self.check_refund(&htlc)
    }

    async fn refund(&self, contract_ref: &str) -> Result<TxReceipt, ProviderError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.take_injected()?;

        let tx_hash = {
            let mut entry = self
                .htlcs
                .get_mut(contract_ref)
                .ok_or_else(|| ProviderError::NotFound(contract_ref.to_string()))?;
            self.check_refund(&entry)?;
            let tx_hash = Self::next_tx_hash();
            entry.status = HtlcStatus::Refunded {
                tx_hash: tx_hash.clone(),
            };
            tx_hash
        };
        tracing::info!(contract_ref, "HTLC refunded");

        self.respond().await;
        Ok(TxReceipt { tx_hash })
    }

    async fn lock_status(&self, contract_ref: &str) -> Result<LockObservation, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.htlcs
            .get(contract_ref)
            .map(|h| self.observe(&h))
            .ok_or_else(|| ProviderError::NotFound(contract_ref.to_string()))
    }

    async fn find_lock(&self, payment_hash: &PaymentHash) -> Result<Option<LockObservation>, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok(self
            .htlcs
            .iter()
            .find(|h| &h.payment_hash == payment_hash)
            .map(|h| self.observe(&h)))
    }

    fn provider_id(&self) -> &str {
        "htlc-internal"
    }
}
