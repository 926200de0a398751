//! Delegate implementation registry
//!
//! Static per-chain table of the contracts an account delegates to and the
//! ERC-4337 entry point its user operations go through. A chain missing from
//! this table is a configuration error, never something to retry.

use crate::config::rpc::chains;
use crate::{Error, Result};
use alloy::primitives::{address, Address};
use std::collections::HashMap;

/// Well-known contract addresses
pub mod addresses {
    use super::*;

    /// Stateless EIP-7702 DeleGator implementation (deterministic deployment)
    pub const STATELESS_7702_DELEGATOR: Address =
        address!("63c0c19a282a1b52b07dd5a65b58948a07dae32b");

    /// ERC-4337 EntryPoint v0.7
    pub const ENTRY_POINT_V07: Address = address!("0000000071727de22e5e9d8baf0edac6f37da032");

    pub const ZERO_ADDRESS: Address = address!("0000000000000000000000000000000000000000");
}

/// Contracts deployed on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deployment {
    /// Human readable chain name
    pub name: &'static str,
    /// Delegate implementation installed by the authorization
    pub delegate: Address,
    /// Entry point the relay submits user operations to
    pub entry_point: Address,
    /// Block explorer base URL (no trailing slash)
    pub explorer: &'static str,
}

impl Deployment {
    const fn delegator(name: &'static str, explorer: &'static str) -> Self {
        Self {
            name,
            delegate: addresses::STATELESS_7702_DELEGATOR,
            entry_point: addresses::ENTRY_POINT_V07,
            explorer,
        }
    }

    /// Explorer link for a transaction hash
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer, tx_hash)
    }
}

/// Registry of deployments keyed by chain id
pub struct DelegateRegistry {
    deployments: HashMap<u64, Deployment>,
}

impl DelegateRegistry {
    /// Registry with every chain the DeleGator framework is deployed on
    pub fn new() -> Self {
        let mut deployments = HashMap::new();

        deployments.insert(
            chains::SEPOLIA,
            Deployment::delegator("sepolia", "https://sepolia.etherscan.io"),
        );
        deployments.insert(
            chains::ETHEREUM,
            Deployment::delegator("ethereum", "https://etherscan.io"),
        );
        deployments.insert(
            chains::BASE_SEPOLIA,
            Deployment::delegator("base-sepolia", "https://sepolia.basescan.org"),
        );
        deployments.insert(
            chains::BASE,
            Deployment::delegator("base", "https://basescan.org"),
        );
        deployments.insert(
            chains::OPTIMISM,
            Deployment::delegator("optimism", "https://optimistic.etherscan.io"),
        );
        deployments.insert(
            chains::ARBITRUM,
            Deployment::delegator("arbitrum", "https://arbiscan.io"),
        );

        Self { deployments }
    }

    /// Empty registry, mostly useful to exercise unsupported chains
    pub fn empty() -> Self {
        Self {
            deployments: HashMap::new(),
        }
    }

    /// Register or replace a deployment
    pub fn with_deployment(mut self, chain_id: u64, deployment: Deployment) -> Self {
        self.deployments.insert(chain_id, deployment);
        self
    }

    /// Resolve the deployment for a chain
    pub fn lookup(&self, chain_id: u64) -> Result<&Deployment> {
        self.deployments
            .get(&chain_id)
            .ok_or(Error::UnsupportedChain(chain_id))
    }

    /// Delegate implementation address for a chain
    pub fn delegate_for(&self, chain_id: u64) -> Result<Address> {
        self.lookup(chain_id).map(|d| d.delegate)
    }

    pub fn chains(&self) -> impl Iterator<Item = &u64> {
        self.deployments.keys()
    }
}

impl Default for DelegateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
