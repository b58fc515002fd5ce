use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineError;

/// Chain watcher polling behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Interval of the chain and payment-network poll.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Interval of the timelock expiry sweep.
    #[serde(default = "default_timelock_scan_secs")]
    pub timelock_scan_secs: u64,
    /// Retries of a single RPC before the swap is skipped for this poll.
    #[serde(default = "default_rpc_max_retries")]
    pub rpc_max_retries: u32,
    #[serde(default = "default_rpc_backoff_base_ms")]
    pub rpc_backoff_base_ms: u64,
    /// Swaps observed concurrently during one poll.
    #[serde(default = "default_max_parallel_polls")]
    pub max_parallel_polls: usize,
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_timelock_scan_secs() -> u64 {
    30
}
fn default_rpc_max_retries() -> u32 {
    5
}
fn default_rpc_backoff_base_ms() -> u64 {
    500
}
fn default_max_parallel_polls() -> usize {
    16
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timelock_scan_secs: default_timelock_scan_secs(),
            rpc_max_retries: default_rpc_max_retries(),
            rpc_backoff_base_ms: default_rpc_backoff_base_ms(),
            max_parallel_polls: default_max_parallel_polls(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.poll_interval_secs as i64)
    }

    pub fn timelock_scan(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timelock_scan_secs as i64)
    }

    /// Cap on a single RPC backoff delay.
    pub fn rpc_backoff_max(&self) -> Duration {
        Duration::from_millis(self.rpc_backoff_base_ms.saturating_mul(32))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.poll_interval_secs == 0 || self.timelock_scan_secs == 0 {
            return Err(EngineError::Validation(
                "watcher intervals must be positive".into(),
            ));
        }
        if self.max_parallel_polls == 0 {
            return Err(EngineError::Validation(
                "max_parallel_polls must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Identity of the operating agent on the contract chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent's chain address; sender of agent-funded locks and recipient of
    /// locks it claims.
    #[serde(default = "default_agent_address")]
    pub agent_address: String,
    /// Address of the HTLC contract.
    #[serde(default = "default_htlc_contract_address")]
    pub htlc_contract_address: String,
}

fn default_agent_address() -> String {
    "agent.internal".to_string()
}
fn default_htlc_contract_address() -> String {
    "htlc.internal".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_address: default_agent_address(),
            htlc_contract_address: default_htlc_contract_address(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.agent_address.trim().is_empty() {
            return Err(EngineError::Validation("agent_address is empty".into()));
        }
        if self.htlc_contract_address.trim().is_empty() {
            return Err(EngineError::Validation(
                "htlc_contract_address is empty".into(),
            ));
        }
        Ok(())
    }
}
