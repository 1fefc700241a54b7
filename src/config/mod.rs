//! Node configuration
//!
//! Protocol parameters are constants; only node-local tunables live here.
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::constants::DEFAULT_MAX_TIMESTAMP_DRIFT;
use crate::dht::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid node config: {0}")]
    Invalid(String),
    #[error("invalid chain config: {0}")]
    InvalidChainConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory of the sled database
    pub data_dir: PathBuf,
    /// Keep everything in memory; `data_dir` is ignored
    pub in_memory: bool,
    /// How long the startup and shutdown barriers wait for a sub-system
    pub barrier_timeout_ms: u64,
    /// Period of the peer head poll per chain
    pub sync_interval_ms: u64,
    /// Schedule for missing-ancestor lookups
    pub fetch_retry: RetryPolicy,
    /// Blocks with unknown parents held per chain; also caps the ancestor
    /// fetches in flight
    pub max_orphans: usize,
    /// Seconds a block timestamp may run ahead of local time
    pub max_timestamp_drift: u64,
    /// Hex-encoded 32-byte account seed loaded into the key holder at startup
    pub account_seed: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("tau-data"),
            in_memory: false,
            barrier_timeout_ms: 30_000,
            sync_interval_ms: 10_000,
            fetch_retry: RetryPolicy::default(),
            max_orphans: 256,
            max_timestamp_drift: DEFAULT_MAX_TIMESTAMP_DRIFT,
            account_seed: None,
        }
    }
}

impl NodeConfig {
    /// In-memory node with short timers
    pub fn ephemeral() -> Self {
        Self {
            in_memory: true,
            barrier_timeout_ms: 5_000,
            sync_interval_ms: 200,
            fetch_retry: RetryPolicy {
                base_delay_ms: 10,
                max_delay_ms: 100,
                attempts: 5,
            },
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.barrier_timeout_ms == 0 {
            return Err(ConfigError::Invalid("barrier_timeout_ms must be positive".into()));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid("sync_interval_ms must be positive".into()));
        }
        if self.max_orphans == 0 {
            return Err(ConfigError::Invalid("max_orphans must be positive".into()));
        }
        if !self.in_memory && self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir is required unless in_memory".into()));
        }
        if let Some(seed) = &self.account_seed {
            self.decode_seed(seed)?;
        }
        Ok(())
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn account_seed_bytes(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        self.account_seed.as_deref().map(|seed| self.decode_seed(seed)).transpose()
    }

    fn decode_seed(&self, seed: &str) -> Result<[u8; 32], ConfigError> {
        let bytes = hex::decode(seed).map_err(|e| ConfigError::Invalid(format!("account_seed: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| ConfigError::Invalid("account_seed must be 32 bytes".into()))
    }
}
