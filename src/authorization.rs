//! One-time EIP-7702 authorization
//!
//! Turns a freshly signed [`AuthorizationStatement`] into an on-chain
//! delegation: the statement rides in the authorization list of a no-op
//! transaction to the zero address. Each attempt re-reads the nonce and the
//! statement is moved into the envelope, so a signed statement can never be
//! broadcast twice.
//!
//! [`AuthorizationStatement`]: crate::wallet::AuthorizationStatement

use crate::chain::{ChainReader, ChainWriter, TransactionEnvelope, TxStatus};
use crate::config::PollSettings;
use crate::error::SubmissionRef;
use crate::intent::SubmissionReceipt;
use crate::poll::{poll_until, CancelToken, PollOutcome};
use crate::registry::addresses::ZERO_ADDRESS;
use crate::registry::DelegateRegistry;
use crate::wallet::{ExecutorMode, KeySigner};
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, TxHash, U256};

/// A broadcast authorization that has not been confirmed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastAuthorization {
    pub tx_hash: TxHash,
    pub delegate: Address,
    pub chain_id: u64,
    /// Nonce the statement was bound to
    pub nonce: u64,
}

/// Builds, broadcasts and confirms the authorization transaction
pub struct AuthorizationFlow<'a> {
    signer: &'a KeySigner,
    reader: &'a dyn ChainReader,
    writer: &'a dyn ChainWriter,
    registry: &'a DelegateRegistry,
    polling: PollSettings,
}

impl<'a> AuthorizationFlow<'a> {
    pub fn new(
        signer: &'a KeySigner,
        reader: &'a dyn ChainReader,
        writer: &'a dyn ChainWriter,
        registry: &'a DelegateRegistry,
    ) -> Self {
        Self {
            signer,
            reader,
            writer,
            registry,
            polling: PollSettings::default(),
        }
    }

    pub fn with_polling(mut self, polling: PollSettings) -> Self {
        self.polling = polling;
        self
    }

    /// Sign and broadcast; returns once the node accepted the transaction
    pub async fn broadcast(
        &self,
        chain_id: u64,
        executor: ExecutorMode,
    ) -> Result<BroadcastAuthorization> {
        let delegate = self.registry.delegate_for(chain_id)?;

        let statement = self
            .signer
            .sign_authorization(self.reader, delegate, chain_id, executor)
            .await?;
        let nonce = statement.nonce();
        let executor = statement.executor();

        let envelope = TransactionEnvelope {
            to: ZERO_ADDRESS,
            value: U256::ZERO,
            data: Bytes::new(),
            authorization_list: Some(vec![statement.into_signed()]),
        };

        let tx_hash = self
            .writer
            .broadcast(envelope, self.signer)
            .await
            .map_err(|e| Error::rejected(e.to_string()))?;

        tracing::info!(
            authority = %self.signer.address(),
            %delegate,
            chain_id,
            nonce,
            ?executor,
            %tx_hash,
            "Authorization broadcast"
        );

        Ok(BroadcastAuthorization {
            tx_hash,
            delegate,
            chain_id,
            nonce,
        })
    }

    /// Poll the chain until the transaction is included
    ///
    /// A failed status query counts as "not yet"; only the ceiling ends the
    /// wait, and the error keeps the hash.
    pub async fn await_confirmation(
        &self,
        tx_hash: TxHash,
        cancel: &CancelToken,
    ) -> Result<SubmissionReceipt> {
        let reference = SubmissionRef::Transaction(tx_hash.to_string());

        let outcome = poll_until(self.polling, cancel, |attempt| async move {
            match self.reader.transaction_status(tx_hash).await {
                Ok(TxStatus::Pending) => None,
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(%tx_hash, attempt, error = %e, "Receipt query failed");
                    None
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(TxStatus::Confirmed) => {
                tracing::info!(%tx_hash, "Authorization confirmed");
                Ok(SubmissionReceipt::confirmed(reference, tx_hash))
            }
            PollOutcome::Ready(_) => Err(Error::SubmissionRejected {
                reason: "authorization transaction reverted".to_string(),
                reference: Some(reference),
            }),
            PollOutcome::TimedOut => Err(Error::SubmissionTimeout { reference }),
            PollOutcome::Cancelled => Err(Error::PollingCancelled { reference }),
        }
    }

    /// Broadcast then wait for inclusion
    pub async fn run(
        &self,
        chain_id: u64,
        executor: ExecutorMode,
        cancel: &CancelToken,
    ) -> Result<SubmissionReceipt> {
        let broadcast = self.broadcast(chain_id, executor).await?;
        self.await_confirmation(broadcast.tx_hash, cancel).await
    }
}
