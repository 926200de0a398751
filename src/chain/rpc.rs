//! JSON-RPC chain client backed by alloy providers
//!
//! SECURITY NOTE:
//! - Reads only ever use the account's public address
//! - Broadcasting borrows the signer's `EthereumWallet`; the key stays in
//!   the wallet module

use super::{AccountState, ChainError, ChainReader, ChainWriter, TransactionEnvelope, TxStatus};
use crate::config::RpcConfig;
use crate::wallet::KeySigner;
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

/// Chain client for a single chain
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    /// RPC URL for the chain
    rpc_url: url::Url,
    /// Chain ID
    chain_id: u64,
}

impl RpcChainClient {
    /// Create a client for a specific chain
    pub fn new(rpc_url: &str, chain_id: u64) -> Result<Self, ChainError> {
        let rpc_url = rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidUrl(format!("{}", e)))?;
        Ok(Self { rpc_url, chain_id })
    }

    /// Create a client from RPC config
    pub fn from_rpc_config(rpc_config: &RpcConfig, chain_id: u64) -> crate::Result<Self> {
        let rpc_url = rpc_config.get(chain_id).ok_or_else(|| {
            crate::Error::Config(format!("RPC URL not configured for chain {}", chain_id))
        })?;
        Self::new(rpc_url, chain_id).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

fn transport<E: std::fmt::Display>(e: E) -> ChainError {
    ChainError::Transport(e.to_string())
}

#[async_trait]
impl ChainReader for RpcChainClient {
    async fn read(&self, address: Address, chain_id: u64) -> Result<AccountState, ChainError> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());

        let actual = provider.get_chain_id().await.map_err(transport)?;
        if actual != chain_id {
            return Err(ChainError::WrongChain {
                expected: chain_id,
                actual,
            });
        }

        let nonce = provider
            .get_transaction_count(address)
            .await
            .map_err(transport)?;
        let balance = provider.get_balance(address).await.map_err(transport)?;
        let code = provider.get_code_at(address).await.map_err(transport)?;

        tracing::debug!(%address, nonce, %balance, code_len = code.len(), "Read account state");

        Ok(AccountState {
            nonce,
            balance,
            code,
        })
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        let tx = TransactionRequest::default().to(to).input(data.into());
        provider.call(tx).await.map_err(transport)
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TxStatus, ChainError> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(transport)?;

        Ok(match receipt {
            None => TxStatus::Pending,
            Some(receipt) if receipt.status() => TxStatus::Confirmed,
            Some(_) => TxStatus::Reverted,
        })
    }
}

/// Node responses meaning the exact same transaction is already in the pool
fn is_duplicate(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["already known", "known transaction", "alreadyknown", "already imported"]
        .iter()
        .any(|needle| message.contains(needle))
}

#[async_trait]
impl ChainWriter for RpcChainClient {
    async fn broadcast(
        &self,
        envelope: TransactionEnvelope,
        signer: &KeySigner,
    ) -> Result<TxHash, ChainError> {
        let provider = ProviderBuilder::new()
            .wallet(signer.wallet().clone())
            .connect_http(self.rpc_url.clone());

        // Fill and sign locally so the hash is known before the node answers
        let request = envelope.into_request(signer.address());
        let signed = provider
            .fill(request)
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?
            .try_into_envelope()
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        let hash = *signed.tx_hash();

        match provider.send_tx_envelope(signed).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) if is_duplicate(&e.to_string()) => {
                tracing::info!(%hash, "Node already has this transaction");
                Ok(hash)
            }
            Err(e) => Err(ChainError::Rejected(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn duplicate_broadcast_is_recognised() {
        assert!(is_duplicate("server returned an error response: error code -32000: already known"));
        assert!(is_duplicate("Known transaction: 0xabc"));
        assert!(!is_duplicate("nonce too low"));
        assert!(!is_duplicate("insufficient funds for gas * price + value"));
    }

    #[test]
    fn rejects_invalid_url() {
        let err = RpcChainClient::new("not a url", 1).unwrap_err();
        assert!(matches!(err, ChainError::InvalidUrl(_)));
    }

    #[test]
    fn from_rpc_config_requires_chain() {
        let mut urls = HashMap::new();
        urls.insert(11155111, "http://localhost:8545".to_string());
        let config = RpcConfig::with_urls(urls);

        let client = RpcChainClient::from_rpc_config(&config, 11155111).unwrap();
        assert_eq!(client.chain_id(), 11155111);

        let err = RpcChainClient::from_rpc_config(&config, 1).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
