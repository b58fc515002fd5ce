//! Swap ledger persisted in RocksDB.
//!
//! Every mutation is a single atomic batch over the swap record, the
//! payment-hash index and the transition log. A process-wide write lock
//! serializes the read-check-write of `insert` and `compare_and_set`.

use async_trait::async_trait;
use hlv_core::{PaymentHash, StepRecord, Swap, SwapId, SwapStep};
use hlv_ledger::{prepare_successor, ISwapLedger, LedgerError, SwapFilter, TransitionRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::storage::{BatchOp, Storage, CF_PAYMENT_HASHES, CF_STEPS, CF_SWAPS, CF_TRANSITIONS};

pub struct RocksLedger {
    storage: Arc<Storage>,
    write_lock: Mutex<()>,
}

fn storage_err(err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LedgerError> {
    serde_json::to_vec(value).map_err(storage_err)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
    serde_json::from_slice(bytes).map_err(storage_err)
}

fn swap_key(swap_id: SwapId) -> Vec<u8> {
    swap_id.as_uuid().as_bytes().to_vec()
}

fn transition_key(swap_id: SwapId, sequence: u64) -> Vec<u8> {
    let mut key = swap_key(swap_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn step_key(swap_id: SwapId, step: SwapStep) -> Vec<u8> {
    let mut key = swap_key(swap_id);
    key.extend_from_slice(step.as_str().as_bytes());
    key
}

impl RocksLedger {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    fn load_swap(&self, swap_id: SwapId) -> Result<Option<Swap>, LedgerError> {
        self.storage
            .get(CF_SWAPS, &swap_key(swap_id))
            .map_err(storage_err)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn hash_owner(&self, hash: &PaymentHash) -> Result<Option<SwapId>, LedgerError> {
        self.storage
            .get(CF_PAYMENT_HASHES, hash.as_bytes())
            .map_err(storage_err)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Index op binding `hash` to `swap_id`, or the conflict.
    fn bind_hash(&self, hash: PaymentHash, swap_id: SwapId) -> Result<BatchOp, LedgerError> {
        match self.hash_owner(&hash)? {
            Some(existing) if existing != swap_id => {
                Err(LedgerError::DuplicatePaymentHash { hash, existing })
            }
            _ => Ok(BatchOp::Put {
                cf: CF_PAYMENT_HASHES,
                key: hash.as_bytes().to_vec(),
                value: encode(&swap_id)?,
            }),
        }
    }

    fn next_sequence(&self, swap_id: SwapId) -> Result<u64, LedgerError> {
        let entries = self
            .storage
            .scan_prefix(CF_TRANSITIONS, &swap_key(swap_id))
            .map_err(storage_err)?;
        Ok(entries.len() as u64)
    }
}

#[async_trait]
impl ISwapLedger for RocksLedger {
    async fn insert(&self, swap: Swap) -> Result<Swap, LedgerError> {
        swap.verify_integrity()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.load_swap(swap.swap_id)?.is_some() {
            return Err(LedgerError::AlreadyExists(swap.swap_id));
        }
        let mut ops = Vec::with_capacity(3);
        if let Some(hash) = swap.payment_hash {
            if !swap.is_terminal() {
                ops.push(self.bind_hash(hash, swap.swap_id)?);
            }
        }
        ops.push(BatchOp::Put {
            cf: CF_SWAPS,
            key: swap_key(swap.swap_id),
            value: encode(&swap)?,
        });
        ops.push(BatchOp::Put {
            cf: CF_TRANSITIONS,
            key: transition_key(swap.swap_id, 0),
            value: encode(&TransitionRecord::created(&swap))?,
        });
        self.storage.write(ops).map_err(storage_err)?;

        tracing::info!(swap_id = %swap.swap_id, status = %swap.status, "swap recorded");
        Ok(swap)
    }

    async fn get(&self, swap_id: SwapId) -> Result<Option<Swap>, LedgerError> {
        self.load_swap(swap_id)
    }

    async fn compare_and_set(&self, prior: &Swap, next: Swap) -> Result<Swap, LedgerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let stored = self
            .load_swap(prior.swap_id)?
            .ok_or(LedgerError::NotFound(prior.swap_id))?;
        let next = prepare_successor(&stored, prior, next)?;

        let mut ops = Vec::with_capacity(3);
        if stored.payment_hash.is_none() {
            if let Some(hash) = next.payment_hash {
                if !next.is_terminal() {
                    ops.push(self.bind_hash(hash, next.swap_id)?);
                }
            }
        }
        if next.is_terminal() {
            if let Some(hash) = next.payment_hash {
                if self.hash_owner(&hash)? == Some(next.swap_id) {
                    ops.push(BatchOp::Delete {
                        cf: CF_PAYMENT_HASHES,
                        key: hash.as_bytes().to_vec(),
                    });
                }
            }
        }
        if stored.status != next.status {
            let sequence = self.next_sequence(next.swap_id)?;
            ops.push(BatchOp::Put {
                cf: CF_TRANSITIONS,
                key: transition_key(next.swap_id, sequence),
                value: encode(&TransitionRecord::between(&stored, &next, sequence))?,
            });
        }
        ops.push(BatchOp::Put {
            cf: CF_SWAPS,
            key: swap_key(next.swap_id),
            value: encode(&next)?,
        });
        self.storage.write(ops).map_err(storage_err)?;

        tracing::debug!(
            swap_id = %next.swap_id,
            from = %stored.status,
            to = %next.status,
            version = next.version,
            "swap updated"
        );
        Ok(next)
    }

    async fn list(&self, filter: &SwapFilter) -> Result<Vec<Swap>, LedgerError> {
        let mut swaps = Vec::new();
        for bytes in self.storage.scan_all(CF_SWAPS).map_err(storage_err)? {
            let swap: Swap = decode(&bytes)?;
            if filter.matches(&swap) {
                swaps.push(swap);
            }
        }
        Ok(filter.finish(swaps))
    }

    async fn find_active_by_payment_hash(
        &self,
        hash: &PaymentHash,
    ) -> Result<Option<Swap>, LedgerError> {
        match self.hash_owner(hash)? {
            Some(swap_id) => self.load_swap(swap_id),
            None => Ok(None),
        }
    }

    async fn transitions(&self, swap_id: SwapId) -> Result<Vec<TransitionRecord>, LedgerError> {
        self.storage
            .scan_prefix(CF_TRANSITIONS, &swap_key(swap_id))
            .map_err(storage_err)?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    async fn step_record(
        &self,
        swap_id: SwapId,
        step: SwapStep,
    ) -> Result<Option<StepRecord>, LedgerError> {
        self.storage
            .get(CF_STEPS, &step_key(swap_id, step))
            .map_err(storage_err)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    async fn put_step_record(&self, record: StepRecord) -> Result<(), LedgerError> {
        self.storage
            .put(CF_STEPS, &step_key(record.swap_id, record.step), &encode(&record)?)
            .map_err(storage_err)
    }
}
