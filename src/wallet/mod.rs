//! Secure key management
//!
//! This module handles private key storage and every signature the session
//! produces. The private key NEVER leaves this module.

mod signer;

pub use signer::{AuthorizationStatement, Credential, ExecutorMode, KeySigner};
