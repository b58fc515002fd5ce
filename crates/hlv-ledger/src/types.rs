use chrono::{DateTime, Utc};
use hlv_core::{Swap, SwapId, SwapStatus};
use serde::{Deserialize, Serialize};

/// Append-only audit entry, keyed by `(swap_id, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub swap_id: SwapId,
    pub sequence: u64,
    /// `None` for the creation entry.
    pub from: Option<SwapStatus>,
    pub to: SwapStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

impl TransitionRecord {
    pub fn created(swap: &Swap) -> Self {
        Self {
            swap_id: swap.swap_id,
            sequence: 0,
            from: None,
            to: swap.status,
            at: swap.created_at,
            note: None,
        }
    }

    pub fn between(prior: &Swap, next: &Swap, sequence: u64) -> Self {
        Self {
            swap_id: next.swap_id,
            sequence,
            from: Some(prior.status),
            to: next.status,
            at: next.updated_at,
            note: next.last_error.clone(),
        }
    }
}

/// Query over swaps. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwapFilter {
    pub user_address: Option<String>,
    pub statuses: Vec<SwapStatus>,
    /// Only swaps whose timelock is at or before this instant.
    pub timelock_before: Option<DateTime<Utc>>,
    /// Only swaps created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SwapFilter {
    pub fn with_statuses(statuses: &[SwapStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    /// Every non-terminal swap.
    pub fn active() -> Self {
        Self::with_statuses(
            &SwapStatus::ALL
                .into_iter()
                .filter(|s| !s.is_terminal())
                .collect::<Vec<_>>(),
        )
    }

    pub fn matches(&self, swap: &Swap) -> bool {
        if let Some(user) = &self.user_address {
            if &swap.user_address != user {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&swap.status) {
            return false;
        }
        if let Some(before) = self.timelock_before {
            if swap.timelock > before {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if swap.created_at < after {
                return false;
            }
        }
        true
    }

    /// Sort newest first and apply the limit.
    pub fn finish(&self, mut swaps: Vec<Swap>) -> Vec<Swap> {
        swaps.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.swap_id.cmp(&a.swap_id))
        });
        if let Some(limit) = self.limit {
            swaps.truncate(limit);
        }
        swaps
    }
}
