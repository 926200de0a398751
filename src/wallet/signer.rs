//! Key signer
//!
//! SECURITY: This is the ONLY place where private keys exist.
//! - Keys are held in alloy's PrivateKeySigner which handles crypto securely
//! - Credentials arrive wrapped in `SecretString` and are never logged
//! - Keys are never serialized

use crate::chain::ChainReader;
use crate::{Error, Result};
use alloy::eips::eip7702::{Authorization, SignedAuthorization};
use alloy::network::EthereumWallet;
use alloy::primitives::{eip191_hash_message, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, SignerSync};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// A private key plus a non-secret label describing where it came from
pub struct Credential {
    source: String,
    secret: SecretString,
}

impl Credential {
    pub fn new(source: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Read a credential from an environment variable
    pub fn from_env(var_name: &str) -> Result<Self> {
        let secret = std::env::var(var_name).map_err(|_| {
            Error::InvalidCredential(format!(
                "Environment variable {} not set. Required for session creation.",
                var_name
            ))
        })?;
        Ok(Self::new(format!("env:{}", var_name), secret))
    }

    /// Where the credential came from (safe to display)
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Who sends the transaction carrying an authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    /// The authorizing account sends it itself, so the carrying
    /// transaction consumes one nonce before the authorization is applied
    #[default]
    #[serde(rename = "self")]
    SelfExecuted,
    /// Someone else pays and sends it
    Sponsor,
}

/// A signed EIP-7702 delegation claim
///
/// Bound to one nonce. It is consumed by [`AuthorizationStatement::into_signed`]
/// and must never be broadcast twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationStatement {
    authority: Address,
    delegate: Address,
    chain_id: u64,
    executor: ExecutorMode,
    nonce: u64,
    signing_hash: B256,
    signature: Signature,
    signed: SignedAuthorization,
}

impl AuthorizationStatement {
    /// Account granting the delegation
    pub fn authority(&self) -> Address {
        self.authority
    }

    pub fn delegate(&self) -> Address {
        self.delegate
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn executor(&self) -> ExecutorMode {
        self.executor
    }

    /// Nonce the statement is bound to
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Hash that was signed
    pub fn signing_hash(&self) -> B256 {
        self.signing_hash
    }

    /// Consume the statement into the wire-level authorization tuple
    pub fn into_signed(self) -> SignedAuthorization {
        self.signed
    }
}

/// Signer that protects the session's private key
///
/// The key is read-only after construction; every flow borrows it through
/// an `Arc` and none may rotate it.
pub struct KeySigner {
    /// The signer
    signer: PrivateKeySigner,
    /// Public address (safe to expose)
    address: Address,
    /// Ethereum wallet for alloy providers
    wallet: EthereumWallet,
}

impl KeySigner {
    /// Create a signer from a credential
    pub fn initialize(credential: &Credential) -> Result<Self> {
        Self::from_hex(credential.secret.expose_secret())
    }

    /// Create a signer from a hex-encoded private key
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let key_hex = key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| Error::InvalidCredential(format!("Invalid private key: {}", e)))?;

        let address = signer.address();
        let wallet = EthereumWallet::from(signer.clone());

        Ok(Self {
            signer,
            address,
            wallet,
        })
    }

    /// Get the public address (safe to share)
    pub fn address(&self) -> Address {
        self.address
    }

    /// Get a reference to the EthereumWallet for use with alloy providers
    ///
    /// This is safe because EthereumWallet only exposes signing operations,
    /// not the raw private key.
    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }

    /// Sign a 32-byte hash as-is
    pub fn sign_hash(&self, hash: &B256) -> Result<Signature> {
        self.signer
            .sign_hash_sync(hash)
            .map_err(|e| Error::InvalidCredential(format!("Signing failed: {}", e)))
    }

    /// Sign an arbitrary payload as an EIP-191 personal message
    ///
    /// Deterministic per payload (RFC 6979 nonces).
    pub fn sign(&self, payload: &[u8]) -> Result<Signature> {
        self.sign_hash(&eip191_hash_message(payload))
    }

    /// Sign a delegation to `delegate` on `chain_id`, bound to the account's
    /// nonce as read right now
    pub async fn sign_authorization(
        &self,
        reader: &dyn ChainReader,
        delegate: Address,
        chain_id: u64,
        executor: ExecutorMode,
    ) -> Result<AuthorizationStatement> {
        let state = reader
            .read(self.address, chain_id)
            .await
            .map_err(|e| Error::NonceResolution(e.to_string()))?;

        let nonce = match executor {
            ExecutorMode::SelfExecuted => state.nonce.checked_add(1).ok_or_else(|| {
                Error::NonceResolution(format!("Nonce overflow for {}", self.address))
            })?,
            ExecutorMode::Sponsor => state.nonce,
        };

        tracing::debug!(
            authority = %self.address,
            %delegate,
            chain_id,
            account_nonce = state.nonce,
            authorization_nonce = nonce,
            "Signing authorization"
        );

        self.sign_authorization_at(delegate, chain_id, executor, nonce)
    }

    /// Sign a delegation for an already resolved nonce
    pub fn sign_authorization_at(
        &self,
        delegate: Address,
        chain_id: u64,
        executor: ExecutorMode,
        nonce: u64,
    ) -> Result<AuthorizationStatement> {
        let authorization = Authorization {
            chain_id: U256::from(chain_id),
            address: delegate,
            nonce,
        };
        let signing_hash = authorization.signature_hash();
        let signature = self.sign_hash(&signing_hash)?;

        Ok(AuthorizationStatement {
            authority: self.address,
            delegate,
            chain_id,
            executor,
            nonce,
            signing_hash,
            signature,
            signed: authorization.into_signed(signature),
        })
    }
}

// Implement Debug manually to avoid exposing the signer
impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySigner")
            .field("address", &self.address)
            .field("signer", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{AccountState, ChainError, TxStatus};
    use alloy::primitives::{address, Bytes, TxHash};
    use async_trait::async_trait;

    // Test private key (DO NOT use in production!)
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DELEGATE: Address = address!("63c0c19a282a1b52b07dd5a65b58948a07dae32b");

    struct NonceReader(Option<u64>);

    #[async_trait]
    impl ChainReader for NonceReader {
        async fn read(&self, _: Address, _: u64) -> std::result::Result<AccountState, ChainError> {
            self.0
                .map(|nonce| AccountState {
                    nonce,
                    ..Default::default()
                })
                .ok_or_else(|| ChainError::Transport("connection refused".to_string()))
        }

        async fn call(&self, _: Address, _: Bytes) -> std::result::Result<Bytes, ChainError> {
            Ok(Bytes::new())
        }

        async fn transaction_status(
            &self,
            _: TxHash,
        ) -> std::result::Result<TxStatus, ChainError> {
            Ok(TxStatus::Pending)
        }
    }

    #[test]
    fn test_signer_from_hex() {
        let signer = KeySigner::from_hex(TEST_KEY).unwrap();
        assert_eq!(
            signer.address(),
            address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266")
        );
    }

    #[test]
    fn test_invalid_credential() {
        let err = KeySigner::from_hex("0xnot-a-key").unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));

        let err = KeySigner::initialize(&Credential::new("inline", "")).unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let signer = KeySigner::from_hex(TEST_KEY).unwrap();
        let debug_str = format!("{:?}", signer);
        assert!(!debug_str.contains("ac0974bec"));
        assert!(debug_str.contains("[REDACTED]"));

        let credential = Credential::new("inline", TEST_KEY);
        let debug_str = format!("{:?}", credential);
        assert!(!debug_str.contains("ac0974bec"));
        assert_eq!(credential.source(), "inline");
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = KeySigner::from_hex(TEST_KEY).unwrap();
        let a = signer.sign(b"hello").unwrap();
        let b = signer.sign(b"hello").unwrap();
        let c = signer.sign(b"other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let recovered = a
            .recover_address_from_prehash(&eip191_hash_message(b"hello"))
            .unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn test_self_executed_binds_next_nonce() {
        let signer = KeySigner::from_hex(TEST_KEY).unwrap();
        let statement = signer
            .sign_authorization(&NonceReader(Some(7)), DELEGATE, 11155111, ExecutorMode::SelfExecuted)
            .await
            .unwrap();

        assert_eq!(statement.nonce(), 8);
        assert_eq!(statement.executor(), ExecutorMode::SelfExecuted);
        assert_eq!(statement.delegate(), DELEGATE);
        assert_eq!(statement.chain_id(), 11155111);
        assert_eq!(statement.authority(), signer.address());

        let recovered = statement
            .signature()
            .recover_address_from_prehash(&statement.signing_hash())
            .unwrap();
        assert_eq!(recovered, signer.address());

        let signed = statement.into_signed();
        assert_eq!(signed.strip_signature().address, DELEGATE);
    }

    #[tokio::test]
    async fn test_sponsor_binds_current_nonce() {
        let signer = KeySigner::from_hex(TEST_KEY).unwrap();
        let statement = signer
            .sign_authorization(&NonceReader(Some(7)), DELEGATE, 1, ExecutorMode::Sponsor)
            .await
            .unwrap();
        assert_eq!(statement.nonce(), 7);
    }

    #[tokio::test]
    async fn test_unreachable_reader_is_nonce_error() {
        let signer = KeySigner::from_hex(TEST_KEY).unwrap();
        let err = signer
            .sign_authorization(&NonceReader(None), DELEGATE, 1, ExecutorMode::SelfExecuted)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NonceResolution(_)));
    }

    #[test]
    fn test_executor_mode_serde() {
        assert_eq!(
            serde_json::to_string(&ExecutorMode::SelfExecuted).unwrap(),
            "\"self\""
        );
        let parsed: ExecutorMode = serde_json::from_str("\"sponsor\"").unwrap();
        assert_eq!(parsed, ExecutorMode::Sponsor);
    }
}
