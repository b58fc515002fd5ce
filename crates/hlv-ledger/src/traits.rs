use async_trait::async_trait;
use hlv_core::{PaymentHash, StepRecord, Swap, SwapId, SwapStep};

use crate::error::LedgerError;
use crate::types::{SwapFilter, TransitionRecord};

/// Durable-state contract for swap records.
///
/// Implementations must make `insert` and `compare_and_set` atomic with
/// respect to each other, and must keep the transition log append-only.
#[async_trait]
pub trait ISwapLedger: Send + Sync {
    /// Store a newly created swap.
    ///
    /// Fails if the id exists or if its payment hash is already bound to
    /// another non-terminal swap.
    async fn insert(&self, swap: Swap) -> Result<Swap, LedgerError>;

    /// Fetch a swap by id.
    async fn get(&self, swap_id: SwapId) -> Result<Option<Swap>, LedgerError>;

    /// Replace `prior` with `next` if the stored record still matches
    /// `prior`'s status and version. Returns the stored successor with its
    /// version bumped.
    async fn compare_and_set(&self, prior: &Swap, next: Swap) -> Result<Swap, LedgerError>;

    /// List swaps matching the filter, newest first.
    async fn list(&self, filter: &SwapFilter) -> Result<Vec<Swap>, LedgerError>;

    /// The non-terminal swap bound to `hash`, if any.
    async fn find_active_by_payment_hash(
        &self,
        hash: &PaymentHash,
    ) -> Result<Option<Swap>, LedgerError>;

    /// Full transition history of a swap, oldest first.
    async fn transitions(&self, swap_id: SwapId) -> Result<Vec<TransitionRecord>, LedgerError>;

    /// Idempotency record for `(swap_id, step)`.
    async fn step_record(
        &self,
        swap_id: SwapId,
        step: SwapStep,
    ) -> Result<Option<StepRecord>, LedgerError>;

    /// Upsert the idempotency record for `(record.swap_id, record.step)`.
    async fn put_step_record(&self, record: StepRecord) -> Result<(), LedgerError>;

    /// Fetch a swap that must exist.
    async fn require(&self, swap_id: SwapId) -> Result<Swap, LedgerError> {
        self.get(swap_id)
            .await?
            .ok_or(LedgerError::NotFound(swap_id))
    }
}

/// Validate a compare-and-set against the currently stored record.
///
/// Returns the successor to persist, with its version bumped.
pub fn prepare_successor(stored: &Swap, prior: &Swap, mut next: Swap) -> Result<Swap, LedgerError> {
    if stored.status != prior.status || stored.version != prior.version {
        return Err(LedgerError::Conflict {
            swap_id: stored.swap_id,
            expected: prior.status,
            expected_version: prior.version,
            actual: stored.status,
            actual_version: stored.version,
        });
    }
    Swap::check_successor(stored, &next)?;
    next.version = stored.version + 1;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use hlv_core::{NewSwap, SwapDirection, SwapEvent, SwapStatus};

    fn swap() -> Swap {
        Swap::new(
            NewSwap {
                direction: SwapDirection::ChainToPayment,
                htlc_amount: 1_000_000_000_000,
                payment_amount: 100,
                htlc_address: "0xhtlc".into(),
                htlc_recipient: "0xagent".into(),
                timelock: Utc::now() + Duration::hours(2),
                user_address: "0xuser".into(),
                agent_address: "0xagent".into(),
                invoice: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_prepare_successor_bumps_version() {
        let stored = swap();
        let next = stored
            .advance(SwapEvent::Cancelled, Utc::now(), |_| {})
            .unwrap();
        let prepared = prepare_successor(&stored, &stored, next).unwrap();
        assert_eq!(prepared.version, 1);
        assert_eq!(prepared.status, SwapStatus::Cancelled);
    }

    #[test]
    fn test_prepare_successor_stale_version() {
        let prior = swap();
        let mut stored = prior.clone();
        stored.version = 3;
        let next = prior.annotate("late", Utc::now()).unwrap();
        assert!(matches!(
            prepare_successor(&stored, &prior, next),
            Err(LedgerError::Conflict { actual_version: 3, .. })
        ));
    }

    #[test]
    fn test_prepare_successor_invalid_edge() {
        let stored = swap();
        let mut next = stored.clone();
        next.status = SwapStatus::Completed;
        assert!(matches!(
            prepare_successor(&stored, &stored, next),
            Err(LedgerError::InvalidTransition {
                from: SwapStatus::Pending,
                to: SwapStatus::Completed
            })
        ));
    }
}
