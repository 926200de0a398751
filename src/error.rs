//! Error types for the delegated session orchestrator

use alloy::primitives::Address;
use std::fmt;
use thiserror::Error;

/// Reference to something already handed to the network.
///
/// Timeouts and cancellations keep it so the caller can look the
/// submission up out-of-band later.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SubmissionRef {
    /// Plain transaction hash (authorization transactions)
    Transaction(String),
    /// User operation hash returned by the relay
    Intent(String),
}

impl fmt::Display for SubmissionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionRef::Transaction(hash) => write!(f, "transaction {}", hash),
            SubmissionRef::Intent(id) => write!(f, "intent {}", id),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("No session established")]
    SessionNotReady,

    #[error("No delegate implementation registered for chain {0}")]
    UnsupportedChain(u64),

    #[error("Failed to resolve nonce: {0}")]
    NonceResolution(String),

    #[error("An authorization is already pending for this session")]
    AuthorizationAlreadyPending,

    #[error("A batch intent is already pending for this session")]
    BatchAlreadyPending,

    #[error("Account {expected} does not match signer address {actual}")]
    AddressMismatch { expected: Address, actual: Address },

    #[error("Intent has no calls")]
    EmptyIntent,

    #[error("Gas price oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Submission rejected: {reason}")]
    SubmissionRejected {
        reason: String,
        /// Set when the rejection happened after something was issued
        reference: Option<SubmissionRef>,
    },

    #[error("Timed out waiting for {reference}")]
    SubmissionTimeout { reference: SubmissionRef },

    #[error("Stopped polling {reference}")]
    PollingCancelled { reference: SubmissionRef },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Relay or chain rejection before anything was issued
    pub fn rejected(reason: impl Into<String>) -> Self {
        Error::SubmissionRejected {
            reason: reason.into(),
            reference: None,
        }
    }

    /// Stable tag the presentation layer renders
    pub fn tag(&self) -> &'static str {
        match self {
            Error::InvalidCredential(_) => "invalid-credential",
            Error::SessionNotReady => "session-not-ready",
            Error::UnsupportedChain(_) => "unsupported-chain",
            Error::NonceResolution(_) => "nonce-resolution-error",
            Error::AuthorizationAlreadyPending => "authorization-already-pending",
            Error::BatchAlreadyPending => "batch-already-pending",
            Error::AddressMismatch { .. } => "address-mismatch",
            Error::EmptyIntent => "empty-intent",
            Error::OracleUnavailable(_) => "oracle-unavailable",
            Error::SubmissionRejected { .. } => "submission-rejected",
            Error::SubmissionTimeout { .. } => "submission-timeout",
            Error::PollingCancelled { .. } => "polling-cancelled",
            Error::Config(_) => "config",
            Error::Json(_) => "json",
        }
    }

    /// The issued hash or intent id, when the failure happened after issuing
    pub fn submission_ref(&self) -> Option<&SubmissionRef> {
        match self {
            Error::SubmissionTimeout { reference } | Error::PollingCancelled { reference } => {
                Some(reference)
            }
            Error::SubmissionRejected { reference, .. } => reference.as_ref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
