//! RPC endpoint configuration
//!
//! Supports multiple configuration methods following Ethereum ecosystem conventions:
//! 1. Per-chain env vars (SEPOLIA_RPC_URL, ETH_RPC_URL, etc.) - highest priority
//! 2. Provider API keys (ALCHEMY_API_KEY, INFURA_API_KEY) - builds URLs automatically
//! 3. Public RPC fallbacks - for testing only
//!
//! The relay (bundler) endpoint is resolved separately by [`relay_url_from_env`]:
//! BUNDLER_URL, then PIMLICO_URL, then a Pimlico URL built from PIMLICO_API_KEY.
//!
//! # Examples
//!
//! ```bash
//! export SEPOLIA_RPC_URL="https://eth-sepolia.g.alchemy.com/v2/YOUR_KEY"
//! export PIMLICO_API_KEY="pim_..."
//! ```

use std::collections::HashMap;

/// RPC configuration for multiple chains
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// RPC URLs indexed by chain ID
    urls: HashMap<u64, String>,
}

/// Chain ID constants
pub mod chains {
    pub const ETHEREUM: u64 = 1;
    pub const SEPOLIA: u64 = 11155111;
    pub const ARBITRUM: u64 = 42161;
    pub const OPTIMISM: u64 = 10;
    pub const BASE: u64 = 8453;
    pub const BASE_SEPOLIA: u64 = 84532;
}

/// Environment variable names
pub(crate) mod env_vars {
    // Per-chain URLs (highest priority)
    pub const ETH_RPC_URL: &str = "ETH_RPC_URL";
    pub const SEPOLIA_RPC_URL: &str = "SEPOLIA_RPC_URL";
    pub const ARBITRUM_RPC_URL: &str = "ARBITRUM_RPC_URL";
    pub const OPTIMISM_RPC_URL: &str = "OPTIMISM_RPC_URL";
    pub const BASE_RPC_URL: &str = "BASE_RPC_URL";
    pub const BASE_SEPOLIA_RPC_URL: &str = "BASE_SEPOLIA_RPC_URL";

    // Provider API keys
    pub const ALCHEMY_API_KEY: &str = "ALCHEMY_API_KEY";
    pub const INFURA_API_KEY: &str = "INFURA_API_KEY";

    // Relay
    pub const BUNDLER_URL: &str = "BUNDLER_URL";
    pub const PIMLICO_URL: &str = "PIMLICO_URL";
    pub const PIMLICO_API_KEY: &str = "PIMLICO_API_KEY";
}

/// Public RPC endpoints (rate limited, for testing only)
mod public_rpcs {
    pub const ETHEREUM: &str = "https://eth.llamarpc.com";
    pub const SEPOLIA: &str = "https://ethereum-sepolia-rpc.publicnode.com";
    pub const ARBITRUM: &str = "https://arb1.arbitrum.io/rpc";
    pub const OPTIMISM: &str = "https://mainnet.optimism.io";
    pub const BASE: &str = "https://mainnet.base.org";
    pub const BASE_SEPOLIA: &str = "https://sepolia.base.org";
}

const PER_CHAIN_VARS: [(&str, u64); 6] = [
    (env_vars::ETH_RPC_URL, chains::ETHEREUM),
    (env_vars::SEPOLIA_RPC_URL, chains::SEPOLIA),
    (env_vars::ARBITRUM_RPC_URL, chains::ARBITRUM),
    (env_vars::OPTIMISM_RPC_URL, chains::OPTIMISM),
    (env_vars::BASE_RPC_URL, chains::BASE),
    (env_vars::BASE_SEPOLIA_RPC_URL, chains::BASE_SEPOLIA),
];

impl RpcConfig {
    /// Create RPC config from environment variables
    ///
    /// Priority:
    /// 1. Per-chain env vars (SEPOLIA_RPC_URL, ETH_RPC_URL, etc.)
    /// 2. ALCHEMY_API_KEY - builds URLs for all chains
    /// 3. INFURA_API_KEY - builds URLs for supported chains
    /// 4. Public RPC fallbacks (for testing only)
    pub fn from_env() -> Self {
        let mut urls = HashMap::new();

        for (var, chain_id) in PER_CHAIN_VARS {
            if let Ok(url) = std::env::var(var) {
                tracing::debug!(chain_id, "Using {} for RPC", var);
                urls.insert(chain_id, url);
            }
        }

        if urls.is_empty() {
            if let Ok(key) = std::env::var(env_vars::ALCHEMY_API_KEY) {
                tracing::info!("Building RPC URLs from ALCHEMY_API_KEY");
                urls.extend(alchemy_urls(&key));
            }
        }

        if urls.is_empty() {
            if let Ok(key) = std::env::var(env_vars::INFURA_API_KEY) {
                tracing::info!("Building RPC URLs from INFURA_API_KEY");
                urls.extend(infura_urls(&key));
            }
        }

        if !urls.contains_key(&chains::SEPOLIA) {
            tracing::warn!("No RPC configured for Sepolia, using public RPC (rate limited)");
        }
        urls.entry(chains::ETHEREUM)
            .or_insert_with(|| public_rpcs::ETHEREUM.to_string());
        urls.entry(chains::SEPOLIA)
            .or_insert_with(|| public_rpcs::SEPOLIA.to_string());
        urls.entry(chains::ARBITRUM)
            .or_insert_with(|| public_rpcs::ARBITRUM.to_string());
        urls.entry(chains::OPTIMISM)
            .or_insert_with(|| public_rpcs::OPTIMISM.to_string());
        urls.entry(chains::BASE)
            .or_insert_with(|| public_rpcs::BASE.to_string());
        urls.entry(chains::BASE_SEPOLIA)
            .or_insert_with(|| public_rpcs::BASE_SEPOLIA.to_string());

        Self { urls }
    }

    /// Create with explicit RPC URLs
    pub fn with_urls(urls: HashMap<u64, String>) -> Self {
        Self { urls }
    }

    /// Get RPC URL for a chain
    pub fn get(&self, chain_id: u64) -> Option<&str> {
        self.urls.get(&chain_id).map(|s| s.as_str())
    }

    /// Check if a chain is configured
    pub fn has_chain(&self, chain_id: u64) -> bool {
        self.urls.contains_key(&chain_id)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn alchemy_urls(key: &str) -> Vec<(u64, String)> {
    vec![
        (
            chains::ETHEREUM,
            format!("https://eth-mainnet.g.alchemy.com/v2/{}", key),
        ),
        (
            chains::SEPOLIA,
            format!("https://eth-sepolia.g.alchemy.com/v2/{}", key),
        ),
        (
            chains::ARBITRUM,
            format!("https://arb-mainnet.g.alchemy.com/v2/{}", key),
        ),
        (
            chains::OPTIMISM,
            format!("https://opt-mainnet.g.alchemy.com/v2/{}", key),
        ),
        (
            chains::BASE,
            format!("https://base-mainnet.g.alchemy.com/v2/{}", key),
        ),
        (
            chains::BASE_SEPOLIA,
            format!("https://base-sepolia.g.alchemy.com/v2/{}", key),
        ),
    ]
}

fn infura_urls(key: &str) -> Vec<(u64, String)> {
    // Infura doesn't serve Base
    vec![
        (chains::ETHEREUM, format!("https://mainnet.infura.io/v3/{}", key)),
        (chains::SEPOLIA, format!("https://sepolia.infura.io/v3/{}", key)),
        (
            chains::ARBITRUM,
            format!("https://arbitrum-mainnet.infura.io/v3/{}", key),
        ),
        (
            chains::OPTIMISM,
            format!("https://optimism-mainnet.infura.io/v3/{}", key),
        ),
    ]
}

/// Resolve the bundler relay URL for a chain from the environment
pub fn relay_url_from_env(chain_id: u64) -> Option<String> {
    if let Ok(url) = std::env::var(env_vars::BUNDLER_URL) {
        return Some(url);
    }
    if let Ok(url) = std::env::var(env_vars::PIMLICO_URL) {
        return Some(url);
    }
    std::env::var(env_vars::PIMLICO_API_KEY)
        .ok()
        .map(|key| pimlico_url(chain_id, &key))
}

/// Pimlico bundler endpoint for a chain
pub fn pimlico_url(chain_id: u64, api_key: &str) -> String {
    format!("https://api.pimlico.io/v2/{}/rpc?apikey={}", chain_id, api_key)
}
