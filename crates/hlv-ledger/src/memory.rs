use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hlv_core::{PaymentHash, StepRecord, Swap, SwapId, SwapStep};

use crate::error::LedgerError;
use crate::traits::{prepare_successor, ISwapLedger};
use crate::types::{SwapFilter, TransitionRecord};

/// In-process ledger.
///
/// Thread-safe: uses `DashMap` for concurrent access. Compare-and-set holds
/// the swap's shard lock for the whole check-and-write.
pub struct MemoryLedger {
    swaps: DashMap<SwapId, Swap>,
    /// Payment hash -> non-terminal swap bound to it.
    active_hashes: DashMap<PaymentHash, SwapId>,
    transitions: DashMap<SwapId, Vec<TransitionRecord>>,
    steps: DashMap<(SwapId, SwapStep), StepRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            swaps: DashMap::new(),
            active_hashes: DashMap::new(),
            transitions: DashMap::new(),
            steps: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.swaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swaps.is_empty()
    }

    fn bind_hash(&self, hash: PaymentHash, swap_id: SwapId) -> Result<(), LedgerError> {
        match self.active_hashes.entry(hash) {
            Entry::Occupied(existing) if *existing.get() != swap_id => {
                Err(LedgerError::DuplicatePaymentHash {
                    hash,
                    existing: *existing.get(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(swap_id);
                Ok(())
            }
        }
    }

    fn append_transition(&self, record: TransitionRecord) {
        self.transitions
            .entry(record.swap_id)
            .or_default()
            .push(record);
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ISwapLedger for MemoryLedger {
    async fn insert(&self, swap: Swap) -> Result<Swap, LedgerError> {
        swap.verify_integrity()?;
        if self.swaps.contains_key(&swap.swap_id) {
            return Err(LedgerError::AlreadyExists(swap.swap_id));
        }
        if let Some(hash) = swap.payment_hash {
            if !swap.is_terminal() {
                self.bind_hash(hash, swap.swap_id)?;
            }
        }

        match self.swaps.entry(swap.swap_id) {
            Entry::Occupied(_) => {
                if let Some(hash) = swap.payment_hash {
                    self.active_hashes.remove_if(&hash, |_, id| *id == swap.swap_id);
                }
                return Err(LedgerError::AlreadyExists(swap.swap_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(swap.clone());
            }
        }
        self.append_transition(TransitionRecord::created(&swap));

        tracing::info!(swap_id = %swap.swap_id, status = %swap.status, "swap recorded");
        Ok(swap)
    }

    async fn get(&self, swap_id: SwapId) -> Result<Option<Swap>, LedgerError> {
        Ok(self.swaps.get(&swap_id).map(|entry| entry.clone()))
    }

    async fn compare_and_set(&self, prior: &Swap, next: Swap) -> Result<Swap, LedgerError> {
        let mut entry = self
            .swaps
            .get_mut(&prior.swap_id)
            .ok_or(LedgerError::NotFound(prior.swap_id))?;
        let stored = entry.value_mut();

        let next = prepare_successor(stored, prior, next)?;

        if stored.payment_hash.is_none() {
            if let Some(hash) = next.payment_hash {
                self.bind_hash(hash, next.swap_id)?;
            }
        }
        if next.is_terminal() {
            if let Some(hash) = next.payment_hash {
                self.active_hashes.remove_if(&hash, |_, id| *id == next.swap_id);
            }
        }

        if stored.status != next.status {
            let sequence = self
                .transitions
                .get(&next.swap_id)
                .map(|log| log.len() as u64)
                .unwrap_or(0);
            self.append_transition(TransitionRecord::between(stored, &next, sequence));
        }

        tracing::debug!(
            swap_id = %next.swap_id,
            from = %stored.status,
            to = %next.status,
            version = next.version,
            "swap updated"
        );
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self, filter: &SwapFilter) -> Result<Vec<Swap>, LedgerError> {
        let swaps = self
            .swaps
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(filter.finish(swaps))
    }

    async fn find_active_by_payment_hash(
        &self,
        hash: &PaymentHash,
    ) -> Result<Option<Swap>, LedgerError> {
        let Some(swap_id) = self.active_hashes.get(hash).map(|id| *id) else {
            return Ok(None);
        };
        self.get(swap_id).await
    }

    async fn transitions(&self, swap_id: SwapId) -> Result<Vec<TransitionRecord>, LedgerError> {
        Ok(self
            .transitions
            .get(&swap_id)
            .map(|log| log.clone())
            .unwrap_or_default())
    }

    async fn step_record(
        &self,
        swap_id: SwapId,
        step: SwapStep,
    ) -> Result<Option<StepRecord>, LedgerError> {
        Ok(self.steps.get(&(swap_id, step)).map(|r| r.clone()))
    }

    async fn put_step_record(&self, record: StepRecord) -> Result<(), LedgerError> {
        self.steps.insert((record.swap_id, record.step), record);
        Ok(())
    }
}
