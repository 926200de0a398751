//! Configuration for the delegated session orchestrator

pub mod rpc;

use crate::wallet::ExecutorMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Re-export RPC config
pub use rpc::RpcConfig;

/// Environment variable holding the hex private key
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

/// Environment variable overriding the target chain
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";

/// Which tier of the relay's gas price suggestion to pay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    Slow,
    Standard,
    #[default]
    Fast,
}

/// Relay (bundler) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Bundler JSON-RPC URL; falls back to the environment when absent
    #[serde(default)]
    pub url: Option<String>,
    /// Ask the relay's paymaster to sponsor gas
    #[serde(default = "default_sponsored")]
    pub sponsored: bool,
    /// Gas price tier taken from the oracle
    #[serde(default)]
    pub fee_tier: FeeTier,
}

fn default_sponsored() -> bool {
    true
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: None,
            sponsored: true,
            fee_tier: FeeTier::Fast,
        }
    }
}

/// Receipt polling bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Delay between two receipt queries (milliseconds)
    pub interval_ms: u64,
    /// Give up after this long (milliseconds)
    pub timeout_ms: u64,
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,  // 2 seconds
            timeout_ms: 120_000, // 2 minutes
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chain the session operates on
    pub chain_id: u64,
    /// Who sends the authorization transaction
    #[serde(default)]
    pub executor: ExecutorMode,
    /// Relay settings
    #[serde(default)]
    pub relay: RelaySettings,
    /// Receipt polling bounds
    #[serde(default)]
    pub polling: PollSettings,
    /// Path to the JSONL session journal
    #[serde(default)]
    pub journal_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_id: rpc::chains::SEPOLIA,
            executor: ExecutorMode::SelfExecuted,
            relay: RelaySettings::default(),
            polling: PollSettings::default(),
            journal_path: None,
        }
    }
}

impl Config {
    /// Load from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                serde_json::from_str(&content)?
            }
            None => Config::default(),
        };
        config.with_env_overrides()
    }

    /// Apply CHAIN_ID and the relay URL variables
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(CHAIN_ID_ENV) {
            self.chain_id = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {}: {}", CHAIN_ID_ENV, e)))?;
        }
        if self.relay.url.is_none() {
            self.relay.url = rpc::relay_url_from_env(self.chain_id);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings that would make polling never terminate
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            return Err(Error::Config("polling.interval_ms must be > 0".to_string()));
        }
        if self.polling.timeout_ms < self.polling.interval_ms {
            return Err(Error::Config(
                "polling.timeout_ms must be at least polling.interval_ms".to_string(),
            ));
        }
        Ok(())
    }
}
