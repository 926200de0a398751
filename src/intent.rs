//! Batched intents and their receipts

use crate::error::SubmissionRef;
use crate::gas::FeeQuote;
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One call inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCall {
    pub to: Address,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
}

impl BatchCall {
    pub fn new(to: Address, value: U256, data: Bytes) -> Self {
        Self { to, value, data }
    }
}

/// Ordered calls executed atomically by the smart account
///
/// `fee_parameters` stays `None` until the submitter attaches a fresh quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIntent {
    pub account: Address,
    pub calls: Vec<BatchCall>,
    pub fee_parameters: Option<FeeQuote>,
}

impl UserIntent {
    /// Build an intent; zero calls is the one shape that is rejected
    pub fn new(account: Address, calls: Vec<BatchCall>) -> Result<Self> {
        if calls.is_empty() {
            return Err(Error::EmptyIntent);
        }
        Ok(Self {
            account,
            calls,
            fee_parameters: None,
        })
    }

    /// Attach the quote fetched for this attempt
    pub fn with_fees(mut self, quote: FeeQuote) -> Self {
        self.fee_parameters = Some(quote);
        self
    }
}

/// Identifier the relay assigns to a submitted intent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub String);

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a submission stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Final outcome of a submission, frozen once handed to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    /// What was issued: an intent id or a transaction hash
    pub reference: SubmissionRef,
    /// Hash of the transaction that included it
    pub confirmed_hash: Option<TxHash>,
    pub status: ReceiptStatus,
}

impl SubmissionReceipt {
    pub fn confirmed(reference: SubmissionRef, hash: TxHash) -> Self {
        Self {
            reference,
            confirmed_hash: Some(hash),
            status: ReceiptStatus::Confirmed,
        }
    }
}
