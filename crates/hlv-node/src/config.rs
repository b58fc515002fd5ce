//! Node configuration, read from one TOML file.

use anyhow::Context;
use hlv_core::SwapPolicy;
use hlv_engine::{AgentConfig, WatcherConfig};
use hlv_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full configuration for the HLV node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HlvConfig {
    /// Protocol constants: margins, timelocks, depth, rebalance policy.
    #[serde(default)]
    pub swap: SwapPolicy,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Settings of the built-in payment network and HTLC chain.
    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Block interval of the internal HTLC chain.
    #[serde(default = "default_block_interval_secs")]
    pub block_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API listen address.
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Keep everything in memory; nothing survives a restart.
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_block_interval_secs() -> u64 {
    12
}
fn default_api_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    9101
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            block_interval_secs: default_block_interval_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            port: default_api_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            in_memory: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl HlvConfig {
    /// Load config from a TOML file. Missing sections and a missing file
    /// fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.swap.validate()?;
        self.scheduler.validate()?;
        self.watcher.validate()?;
        self.agent.validate()?;
        if self.providers.block_interval_secs == 0 {
            anyhow::bail!("providers.block_interval_secs must be at least 1");
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be \"text\" or \"json\", got {:?}", self.logging.format);
        }
        Ok(())
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.listen_addr, self.api.port)
    }
}
