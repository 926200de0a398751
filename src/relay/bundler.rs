//! ERC-4337 bundler speaking JSON-RPC

use super::{GasPlan, ReceiptPoll, Relay, RelayError, UserOperation};
use crate::intent::IntentId;
use crate::jsonrpc::JsonRpcClient;
use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOperationReceipt {
    success: bool,
    #[serde(default)]
    reason: Option<String>,
    receipt: IncludedTransaction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncludedTransaction {
    transaction_hash: TxHash,
}

/// Bundler endpoint, optionally with paymaster sponsorship
///
/// When `sponsored` is set, gas is planned through `pm_sponsorUserOperation`
/// so the paymaster pays; otherwise `eth_estimateUserOperationGas` is used and
/// the account pays from its own balance.
#[derive(Debug)]
pub struct BundlerClient {
    rpc: JsonRpcClient,
    sponsored: bool,
}

impl BundlerClient {
    pub fn new(url: impl Into<String>, sponsored: bool) -> Self {
        Self {
            rpc: JsonRpcClient::new(url),
            sponsored,
        }
    }

    pub fn is_sponsored(&self) -> bool {
        self.sponsored
    }
}

#[async_trait]
impl Relay for BundlerClient {
    async fn gas_plan(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasPlan, RelayError> {
        let method = if self.sponsored {
            "pm_sponsorUserOperation"
        } else {
            "eth_estimateUserOperationGas"
        };
        let plan: GasPlan = self.rpc.request(method, json!([op, entry_point])).await?;
        tracing::debug!(
            method,
            call_gas = %plan.call_gas_limit,
            verification_gas = %plan.verification_gas_limit,
            paymaster = ?plan.paymaster,
            "Planned user operation gas"
        );
        Ok(plan)
    }

    async fn submit(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<IntentId, RelayError> {
        let hash: String = self
            .rpc
            .request("eth_sendUserOperation", json!([op, entry_point]))
            .await?;
        tracing::info!(intent = %hash, sender = %op.sender, "User operation accepted by bundler");
        Ok(IntentId(hash))
    }

    async fn poll_receipt(&self, id: &IntentId) -> Result<ReceiptPoll, RelayError> {
        let receipt: Option<UserOperationReceipt> = self
            .rpc
            .request("eth_getUserOperationReceipt", json!([id.0]))
            .await?;

        Ok(match receipt {
            None => ReceiptPoll::pending(),
            Some(r) if r.success => ReceiptPoll::confirmed(r.receipt.transaction_hash),
            Some(r) => ReceiptPoll::failed(
                Some(r.receipt.transaction_hash),
                r.reason
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "user operation reverted".to_string()),
            ),
        })
    }
}
