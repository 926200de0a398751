//! Delegated Session Orchestrator
//!
//! Drives a transaction-sending session for one externally-owned account:
//! - Delegate the account to the stateless EIP-7702 DeleGator with a
//!   self-executed authorization transaction
//! - Use the same address as a smart account and batch calls into one
//!   ERC-4337 user operation, sponsored through a bundler relay
//! - Poll every submission to a confirmed receipt or a tagged failure
//!
//! # Security Model
//!
//! - Private keys never leave the wallet module
//! - Collaborators (chain RPC, relay, gas oracle) are passed in explicitly
//! - Session state lives in memory only; the optional journal is write-only

pub mod account;
pub mod authorization;
pub mod chain;
pub mod config;
pub mod gas;
pub mod intent;
pub mod poll;
pub mod registry;
pub mod relay;
pub mod session;
pub mod submitter;
pub mod wallet;

mod error;
mod jsonrpc;

// Re-export commonly used types
pub use config::{Config, RpcConfig, CHAIN_ID_ENV, PRIVATE_KEY_ENV};
pub use error::{Error, Result, SubmissionRef};
pub use intent::{BatchCall, SubmissionReceipt};
pub use session::{Collaborators, SessionController, SessionStatus, SessionView};
