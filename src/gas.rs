//! Gas price oracle
//!
//! Fee quotes are short-lived: the intent submitter asks for a fresh one on
//! every submission attempt and never caches them.

use crate::config::FeeTier;
use crate::jsonrpc::JsonRpcClient;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// EIP-1559 fee parameters, in wei per gas unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    #[serde(rename = "maxFeePerGas", with = "alloy::serde::quantity")]
    pub max_fee_per_unit: u128,
    #[serde(rename = "maxPriorityFeePerGas", with = "alloy::serde::quantity")]
    pub max_priority_fee_per_unit: u128,
}

impl FeeQuote {
    pub fn new(max_fee_per_unit: u128, max_priority_fee_per_unit: u128) -> Self {
        Self {
            max_fee_per_unit,
            max_priority_fee_per_unit,
        }
    }
}

/// Supplies current fee parameters
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// Fetch a quote; failures surface as `OracleUnavailable` with no retry
    async fn quote(&self) -> Result<FeeQuote>;
}

/// All tiers a bundler suggests
#[derive(Debug, Clone, Deserialize)]
struct TieredGasPrice {
    slow: FeeQuote,
    standard: FeeQuote,
    fast: FeeQuote,
}

impl TieredGasPrice {
    fn pick(self, tier: FeeTier) -> FeeQuote {
        match tier {
            FeeTier::Slow => self.slow,
            FeeTier::Standard => self.standard,
            FeeTier::Fast => self.fast,
        }
    }
}

/// Oracle backed by the bundler's `pimlico_getUserOperationGasPrice`
pub struct BundlerGasOracle {
    rpc: JsonRpcClient,
    tier: FeeTier,
}

impl BundlerGasOracle {
    pub fn new(url: impl Into<String>, tier: FeeTier) -> Self {
        Self {
            rpc: JsonRpcClient::new(url),
            tier,
        }
    }
}

#[async_trait]
impl GasPriceOracle for BundlerGasOracle {
    async fn quote(&self) -> Result<FeeQuote> {
        let prices: TieredGasPrice = self
            .rpc
            .request("pimlico_getUserOperationGasPrice", serde_json::json!([]))
            .await
            .map_err(|e| Error::OracleUnavailable(e.to_string()))?;

        let quote = prices.pick(self.tier);
        tracing::debug!(
            tier = ?self.tier,
            max_fee = quote.max_fee_per_unit,
            max_priority_fee = quote.max_priority_fee_per_unit,
            "Fetched gas price"
        );
        Ok(quote)
    }
}
