//! Chain read/write collaborators
//!
//! The core never talks to an RPC endpoint directly. It goes through
//! [`ChainReader`] for state and [`ChainWriter`] for broadcasting, so tests
//! can swap in fakes and the real client stays behind [`rpc::RpcChainClient`].

pub mod rpc;

use crate::wallet::KeySigner;
use alloy::eips::eip7702::SignedAuthorization;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

pub use rpc::RpcChainClient;

/// Prefix of the code an EIP-7702 delegated account carries
pub const DELEGATION_DESIGNATOR: [u8; 3] = [0xef, 0x01, 0x00];

/// Collaborator-side failure, mapped to a session error by the caller
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Connected to chain {actual}, expected {expected}")]
    WrongChain { expected: u64, actual: u64 },

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Invalid RPC URL: {0}")]
    InvalidUrl(String),
}

/// Snapshot of an account
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub code: Bytes,
}

impl AccountState {
    /// Implementation the account currently delegates to, if any
    pub fn delegation(&self) -> Option<Address> {
        let code = self.code.as_ref();
        if code.len() == 23 && code[..3] == DELEGATION_DESIGNATOR {
            Some(Address::from_slice(&code[3..]))
        } else {
            None
        }
    }
}

/// Inclusion status of a broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet included
    Pending,
    /// Included and succeeded
    Confirmed,
    /// Included but reverted
    Reverted,
}

/// One unit of on-chain execution
///
/// When `authorization_list` is set, inclusion also installs the delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEnvelope {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub authorization_list: Option<Vec<SignedAuthorization>>,
}

impl TransactionEnvelope {
    /// Convert into an RPC transaction request sent by `from`
    pub fn into_request(self, from: Address) -> TransactionRequest {
        let mut request = TransactionRequest::default()
            .from(from)
            .to(self.to)
            .value(self.value)
            .input(self.data.into());
        request.authorization_list = self.authorization_list;
        request
    }
}

/// Read-only view of chain state
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Nonce, balance and code of an account on a chain
    async fn read(&self, address: Address, chain_id: u64) -> Result<AccountState, ChainError>;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Whether a transaction has been included yet
    async fn transaction_status(&self, hash: TxHash) -> Result<TxStatus, ChainError>;
}

/// Companion write path of [`ChainReader`]
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Sign and broadcast; returns as soon as the node accepted the transaction
    async fn broadcast(
        &self,
        envelope: TransactionEnvelope,
        signer: &KeySigner,
    ) -> Result<TxHash, ChainError>;
}
