//! Configuration management for wotchain

use crate::crypto::Address;
use crate::error::ChainError;
use crate::mempool::DEFAULT_MEMPOOL_SIZE;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "wotchain.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_mining_enabled")]
    pub enabled: bool,
    /// Address string (`W...`) credited with block rewards.
    #[serde(default)]
    pub reward_address: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_block_transactions")]
    pub max_block_transactions: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            enabled: default_mining_enabled(),
            reward_address: None,
            poll_interval_secs: default_poll_interval(),
            max_block_transactions: default_max_block_transactions(),
        }
    }
}

impl MinerConfig {
    pub fn reward_address(&self) -> Result<Option<Address>, ChainError> {
        self.reward_address
            .as_deref()
            .map(|s| {
                s.parse()
                    .map_err(|e| ChainError::ConfigError(format!("miner.reward_address: {}", e)))
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_mempool_size")]
    pub max_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_mempool_size(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.database.path.is_empty() {
            return Err(ChainError::ConfigError("database.path must be set".to_string()));
        }
        if self.miner.poll_interval_secs == 0 {
            return Err(ChainError::ConfigError("miner.poll_interval_secs must be positive".to_string()));
        }
        if self.mempool.max_size == 0 {
            return Err(ChainError::ConfigError("mempool.max_size must be positive".to_string()));
        }
        let reward = self.miner.reward_address()?;
        if self.miner.enabled && reward.is_none() {
            return Err(ChainError::ConfigError(
                "miner.reward_address must be set when mining is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reads `path`; a missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path)
        .map_err(|e| ChainError::ConfigError(format!("Cannot read {}: {}", path.display(), e)))?;
    Config::from_toml(&text)
}

fn default_database_path() -> String {
    "./data/wotchain.db".to_string()
}

fn default_mining_enabled() -> bool {
    false
}

fn default_poll_interval() -> u64 {
    2
}

fn default_max_block_transactions() -> usize {
    500
}

fn default_mempool_size() -> usize {
    DEFAULT_MEMPOOL_SIZE
}
