//! Relay (bundler) collaborator
//!
//! Signed user operations go to a relay which includes them on-chain,
//! optionally with a paymaster covering gas. The core only needs the
//! [`Relay`] trait; [`bundler::BundlerClient`] speaks the ERC-4337 JSON-RPC.

pub mod bundler;

use crate::intent::{IntentId, ReceiptStatus};
use crate::jsonrpc::RpcError;
use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use bundler::BundlerClient;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The relay understood the request and refused it
    #[error("{0}")]
    Rejected(String),

    #[error("Relay unreachable: {0}")]
    Transport(String),
}

impl From<RpcError> for RelayError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Rpc { message, .. } => RelayError::Rejected(message),
            other => RelayError::Transport(other.to_string()),
        }
    }
}

/// ERC-4337 v0.7 user operation, in the unpacked JSON-RPC shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}

/// Two 128-bit values packed into one word, `high` first
fn pack_u128_pair(high: U256, low: U256) -> B256 {
    B256::from((high << 128) | (low & U256::from(u128::MAX)))
}

fn u128_be(value: Option<U256>) -> [u8; 16] {
    let word: [u8; 32] = value.unwrap_or_default().to_be_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&word[16..]);
    out
}

impl UserOperation {
    /// `verificationGasLimit ‖ callGasLimit`
    pub fn account_gas_limits(&self) -> B256 {
        pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    /// `maxPriorityFeePerGas ‖ maxFeePerGas`
    pub fn gas_fees(&self) -> B256 {
        pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    /// `paymaster ‖ verificationGas ‖ postOpGas ‖ data`, empty when unsponsored
    pub fn paymaster_and_data(&self) -> Bytes {
        let Some(paymaster) = self.paymaster else {
            return Bytes::new();
        };
        let mut out = Vec::with_capacity(52);
        out.extend_from_slice(paymaster.as_slice());
        out.extend_from_slice(&u128_be(self.paymaster_verification_gas_limit));
        out.extend_from_slice(&u128_be(self.paymaster_post_op_gas_limit));
        if let Some(data) = &self.paymaster_data {
            out.extend_from_slice(data);
        }
        Bytes::from(out)
    }
}

/// Gas limits and paymaster fields returned by the relay
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPlan {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    #[serde(default)]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default)]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default)]
    pub paymaster_data: Option<Bytes>,
}

impl GasPlan {
    pub fn apply(self, op: &mut UserOperation) {
        op.call_gas_limit = self.call_gas_limit;
        op.verification_gas_limit = self.verification_gas_limit;
        op.pre_verification_gas = self.pre_verification_gas;
        op.paymaster = self.paymaster;
        op.paymaster_verification_gas_limit = self.paymaster_verification_gas_limit;
        op.paymaster_post_op_gas_limit = self.paymaster_post_op_gas_limit;
        op.paymaster_data = self.paymaster_data;
    }
}

/// One answer to a receipt query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptPoll {
    pub status: ReceiptStatus,
    pub hash: Option<TxHash>,
    /// Relay-reported failure reason
    pub reason: Option<String>,
}

impl ReceiptPoll {
    pub fn pending() -> Self {
        Self {
            status: ReceiptStatus::Pending,
            hash: None,
            reason: None,
        }
    }

    pub fn confirmed(hash: TxHash) -> Self {
        Self {
            status: ReceiptStatus::Confirmed,
            hash: Some(hash),
            reason: None,
        }
    }

    pub fn failed(hash: Option<TxHash>, reason: impl Into<String>) -> Self {
        Self {
            status: ReceiptStatus::Failed,
            hash,
            reason: Some(reason.into()),
        }
    }
}

/// Bundler network the intents are submitted to
#[async_trait]
pub trait Relay: Send + Sync {
    /// Gas limits (and paymaster sponsorship, when enabled) for an operation
    /// carrying a placeholder signature
    async fn gas_plan(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasPlan, RelayError>;

    /// Hand a signed operation over; returns the relay's id for it
    async fn submit(&self, op: &UserOperation, entry_point: Address)
        -> Result<IntentId, RelayError>;

    /// Query the inclusion status of a submitted operation
    async fn poll_receipt(&self, id: &IntentId) -> Result<ReceiptPoll, RelayError>;
}
