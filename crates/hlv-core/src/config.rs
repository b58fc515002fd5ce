use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::amount::apply_basis_points;
use crate::error::CoreError;

/// Protocol constants governing swap execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapPolicy {
    /// Minimum time between "now" and the timelock when the HTLC is created,
    /// and before paying the invoice. Leaves room to claim before refund.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: i64,
    /// Timelock duration applied to new swaps.
    #[serde(default = "default_timelock_secs")]
    pub default_timelock_secs: i64,
    /// Expiry requested for issued invoices.
    #[serde(default = "default_invoice_expiry_secs")]
    pub invoice_expiry_secs: i64,
    /// Depth at which an on-chain event counts as confirmed.
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u32,
    /// Attempts per step before the swap is driven to Failed.
    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: u32,
    /// Upper bound for a single provider call.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default)]
    pub rebalance: RebalancePolicy,
}

/// Sizing of rebalance swaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePolicy {
    /// Share of the source balance to move, in basis points.
    #[serde(default = "default_percentage_bps")]
    pub percentage_bps: u32,
    /// Floor for a rebalance, in satoshis.
    #[serde(default = "default_min_sats")]
    pub min_sats: u64,
    /// Optional cap, in satoshis.
    #[serde(default)]
    pub max_sats: Option<u64>,
}

fn default_safety_margin_secs() -> i64 {
    3_600
}
fn default_timelock_secs() -> i64 {
    86_400
}
fn default_invoice_expiry_secs() -> i64 {
    86_400
}
fn default_confirmation_depth() -> u32 {
    6
}
fn default_max_step_attempts() -> u32 {
    5
}
fn default_step_timeout_ms() -> u64 {
    30_000
}
fn default_percentage_bps() -> u32 {
    2_000
}
fn default_min_sats() -> u64 {
    10
}

impl Default for SwapPolicy {
    fn default() -> Self {
        Self {
            safety_margin_secs: default_safety_margin_secs(),
            default_timelock_secs: default_timelock_secs(),
            invoice_expiry_secs: default_invoice_expiry_secs(),
            confirmation_depth: default_confirmation_depth(),
            max_step_attempts: default_max_step_attempts(),
            step_timeout_ms: default_step_timeout_ms(),
            rebalance: RebalancePolicy::default(),
        }
    }
}

impl Default for RebalancePolicy {
    fn default() -> Self {
        Self {
            percentage_bps: default_percentage_bps(),
            min_sats: default_min_sats(),
            max_sats: None,
        }
    }
}

impl SwapPolicy {
    pub fn safety_margin(&self) -> Duration {
        Duration::seconds(self.safety_margin_secs)
    }

    pub fn default_timelock(&self) -> Duration {
        Duration::seconds(self.default_timelock_secs)
    }

    pub fn step_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.step_timeout_ms)
    }

    /// Reject configurations under which no swap could ever be locked.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.safety_margin_secs <= 0 {
            return Err(CoreError::ValidationError(
                "safety_margin_secs must be positive".into(),
            ));
        }
        if self.default_timelock_secs <= self.safety_margin_secs {
            return Err(CoreError::ValidationError(format!(
                "default_timelock_secs ({}) must exceed safety_margin_secs ({})",
                self.default_timelock_secs, self.safety_margin_secs
            )));
        }
        if self.confirmation_depth == 0 {
            return Err(CoreError::ValidationError(
                "confirmation_depth must be at least 1".into(),
            ));
        }
        if self.max_step_attempts == 0 {
            return Err(CoreError::ValidationError(
                "max_step_attempts must be at least 1".into(),
            ));
        }
        self.rebalance.validate()
    }
}

impl RebalancePolicy {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.percentage_bps == 0 || self.percentage_bps > 10_000 {
            return Err(CoreError::ValidationError(format!(
                "rebalance percentage_bps must be in 1..=10000, got {}",
                self.percentage_bps
            )));
        }
        if let Some(max) = self.max_sats {
            if max < self.min_sats {
                return Err(CoreError::ValidationError(format!(
                    "rebalance max_sats ({}) below min_sats ({})",
                    max, self.min_sats
                )));
            }
        }
        Ok(())
    }

    /// Size a rebalance from the source balance, in satoshis.
    ///
    /// Proportional share, raised to `min_sats` and clamped to `max_sats`.
    pub fn amount_for(&self, balance_sats: u64) -> Result<u64, CoreError> {
        if balance_sats < self.min_sats || balance_sats == 0 {
            return Err(CoreError::InvalidAmount(format!(
                "balance {} sats is below the rebalance minimum of {} sats",
                balance_sats, self.min_sats
            )));
        }
        let mut amount = apply_basis_points(balance_sats, self.percentage_bps).max(self.min_sats);
        if let Some(max) = self.max_sats {
            amount = amount.min(max);
        }
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = SwapPolicy::default();
        assert_eq!(policy.confirmation_depth, 6);
        assert_eq!(policy.safety_margin(), Duration::hours(1));
        assert_eq!(policy.default_timelock(), Duration::hours(24));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_from_json_partial() {
        let policy: SwapPolicy =
            serde_json::from_str(r#"{"confirmation_depth": 3, "rebalance": {"min_sats": 50}}"#)
                .unwrap();
        assert_eq!(policy.confirmation_depth, 3);
        assert_eq!(policy.rebalance.min_sats, 50);
        assert_eq!(policy.rebalance.percentage_bps, 2_000);
        assert_eq!(policy.max_step_attempts, 5);
    }

    #[test]
    fn test_timelock_must_exceed_margin() {
        let policy = SwapPolicy {
            default_timelock_secs: 600,
            safety_margin_secs: 600,
            ..SwapPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_rebalance_proportional() {
        let policy = RebalancePolicy::default();
        assert_eq!(policy.amount_for(100_000).unwrap(), 20_000);
    }

    #[test]
    fn test_rebalance_floor_and_cap() {
        let policy = RebalancePolicy {
            percentage_bps: 2_000,
            min_sats: 10,
            max_sats: Some(1_000),
        };
        assert_eq!(policy.amount_for(20).unwrap(), 10);
        assert_eq!(policy.amount_for(1_000_000).unwrap(), 1_000);
    }

    #[test]
    fn test_rebalance_rejects_small_balance() {
        let policy = RebalancePolicy::default();
        assert!(matches!(policy.amount_for(5), Err(CoreError::InvalidAmount(_))));
        assert!(policy.amount_for(0).is_err());
    }

    #[test]
    fn test_rebalance_invalid_bps() {
        let policy = RebalancePolicy {
            percentage_bps: 10_001,
            ..RebalancePolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
