//! Smart account adapter
//!
//! Once delegated, the signer's own address behaves as a DeleGator smart
//! account. [`SmartAccountHandle`] turns a [`UserIntent`] into a signed
//! ERC-4337 [`UserOperation`]:
//!
//! - calls are wrapped in ERC-7579 `execute(mode, executionCalldata)`
//! - the nonce comes from `EntryPoint.getNonce(sender, 0)`
//! - the signature is EIP-712 over the packed operation under the
//!   DeleGator domain

use crate::chain::ChainReader;
use crate::intent::{BatchCall, UserIntent};
use crate::registry::DelegateRegistry;
use crate::relay::UserOperation;
use crate::wallet::KeySigner;
use crate::{Error, Result};
use alloy::primitives::aliases::U192;
use alloy::primitives::{hex, Address, Bytes, B256, U256};
use alloy::sol_types::{eip712_domain, SolCall, SolStruct, SolValue};
use std::sync::Arc;

mod abi {
    alloy::sol! {
        struct Execution {
            address target;
            uint256 value;
            bytes callData;
        }

        struct PackedUserOperation {
            address sender;
            uint256 nonce;
            bytes initCode;
            bytes callData;
            bytes32 accountGasLimits;
            uint256 preVerificationGas;
            bytes32 gasFees;
            bytes paymasterAndData;
            address entryPoint;
        }

        function execute(bytes32 mode, bytes executionCalldata) external payable;

        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }
}

use abi::{executeCall, getNonceCall, Execution, PackedUserOperation};

/// EIP-712 domain name of the stateless DeleGator
pub const DOMAIN_NAME: &str = "EIP7702StatelessDeleGator";
pub const DOMAIN_VERSION: &str = "1";

/// Well-formed signature the account rejects, used only for gas estimation
const DUMMY_SIGNATURE: [u8; 65] = hex!(
    "fffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

/// ERC-7579 call types (first byte of the execution mode)
const CALLTYPE_SINGLE: u8 = 0x00;
const CALLTYPE_BATCH: u8 = 0x01;

fn execution_mode(call_type: u8) -> B256 {
    let mut mode = B256::ZERO;
    mode.0[0] = call_type;
    mode
}

/// Derives smart-account handles for signer-controlled addresses
pub struct SmartAccountAdapter<'a> {
    registry: &'a DelegateRegistry,
}

impl<'a> SmartAccountAdapter<'a> {
    pub fn new(registry: &'a DelegateRegistry) -> Self {
        Self { registry }
    }

    /// Wrap `account` into a handle; pure, no network I/O
    pub fn derive(
        &self,
        account: Address,
        signer: Arc<KeySigner>,
        reader: Arc<dyn ChainReader>,
        chain_id: u64,
    ) -> Result<SmartAccountHandle> {
        if account != signer.address() {
            return Err(Error::AddressMismatch {
                expected: account,
                actual: signer.address(),
            });
        }
        let deployment = self.registry.lookup(chain_id)?;

        Ok(SmartAccountHandle {
            address: account,
            signer,
            reader,
            entry_point: deployment.entry_point,
            chain_id,
        })
    }
}

/// Signer-controlled smart account on one chain
pub struct SmartAccountHandle {
    address: Address,
    signer: Arc<KeySigner>,
    reader: Arc<dyn ChainReader>,
    entry_point: Address,
    chain_id: u64,
}

impl SmartAccountHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Encode calls as the account's `execute` calldata
    ///
    /// One call uses single mode (`target ‖ value ‖ data` packed); more use
    /// batch mode (`abi.encode(Execution[])`).
    pub fn encode_calls(calls: &[BatchCall]) -> Bytes {
        let (mode, execution_calldata) = match calls {
            [call] => {
                let mut packed = Vec::with_capacity(52 + call.data.len());
                packed.extend_from_slice(call.to.as_slice());
                packed.extend_from_slice(&call.value.to_be_bytes::<32>());
                packed.extend_from_slice(&call.data);
                (execution_mode(CALLTYPE_SINGLE), packed)
            }
            _ => {
                let executions: Vec<Execution> = calls
                    .iter()
                    .map(|call| Execution {
                        target: call.to,
                        value: call.value,
                        callData: call.data.clone(),
                    })
                    .collect();
                (execution_mode(CALLTYPE_BATCH), executions.abi_encode())
            }
        };

        executeCall {
            mode,
            executionCalldata: execution_calldata.into(),
        }
        .abi_encode()
        .into()
    }

    /// Current entry-point nonce (key 0) of the account
    pub async fn nonce(&self) -> Result<U256> {
        let data = getNonceCall {
            sender: self.address,
            key: U192::ZERO,
        }
        .abi_encode();

        let output = self
            .reader
            .call(self.entry_point, data.into())
            .await
            .map_err(|e| Error::NonceResolution(e.to_string()))?;

        getNonceCall::abi_decode_returns(&output)
            .map_err(|e| Error::NonceResolution(format!("Bad getNonce response: {}", e)))
    }

    /// Unsigned operation for `intent`, carrying a placeholder signature and
    /// zero gas limits until the relay plans them
    pub fn prepare(&self, intent: &UserIntent, nonce: U256) -> Result<UserOperation> {
        if intent.account != self.address {
            return Err(Error::AddressMismatch {
                expected: intent.account,
                actual: self.address,
            });
        }
        let fees = intent
            .fee_parameters
            .ok_or_else(|| Error::rejected("intent has no fee parameters"))?;

        Ok(UserOperation {
            sender: self.address,
            nonce,
            call_data: Self::encode_calls(&intent.calls),
            call_gas_limit: U256::ZERO,
            verification_gas_limit: U256::ZERO,
            pre_verification_gas: U256::ZERO,
            max_fee_per_gas: U256::from(fees.max_fee_per_unit),
            max_priority_fee_per_gas: U256::from(fees.max_priority_fee_per_unit),
            paymaster: None,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            paymaster_data: None,
            signature: Bytes::from_static(&DUMMY_SIGNATURE),
        })
    }

    /// EIP-712 digest the account verifies
    pub fn signing_hash(&self, op: &UserOperation) -> B256 {
        let domain = eip712_domain! {
            name: DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id: self.chain_id,
            verifying_contract: self.address,
        };
        let packed = PackedUserOperation {
            sender: op.sender,
            nonce: op.nonce,
            initCode: Bytes::new(),
            callData: op.call_data.clone(),
            accountGasLimits: op.account_gas_limits(),
            preVerificationGas: op.pre_verification_gas,
            gasFees: op.gas_fees(),
            paymasterAndData: op.paymaster_and_data(),
            entryPoint: self.entry_point,
        };
        packed.eip712_signing_hash(&domain)
    }

    /// Sign `op`, returning the 65-byte `r ‖ s ‖ v` signature
    pub fn sign(&self, op: &UserOperation) -> Result<Bytes> {
        let signature = self.signer.sign_hash(&self.signing_hash(op))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }
}

impl std::fmt::Debug for SmartAccountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartAccountHandle")
            .field("address", &self.address)
            .field("entry_point", &self.entry_point)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{AccountState, ChainError, TxStatus};
    use crate::gas::FeeQuote;
    use crate::registry::addresses::ENTRY_POINT_V07;
    use alloy::primitives::{address, TxHash};
    use alloy::signers::Signature;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const SEPOLIA: u64 = 11155111;

    #[derive(Default)]
    struct EntryPointReader {
        nonce: U256,
        calls: Mutex<Vec<(Address, Bytes)>>,
    }

    #[async_trait]
    impl ChainReader for EntryPointReader {
        async fn read(&self, _: Address, _: u64) -> std::result::Result<AccountState, ChainError> {
            Ok(AccountState::default())
        }

        async fn call(&self, to: Address, data: Bytes) -> std::result::Result<Bytes, ChainError> {
            self.calls.lock().unwrap().push((to, data));
            Ok(self.nonce.abi_encode().into())
        }

        async fn transaction_status(
            &self,
            _: TxHash,
        ) -> std::result::Result<TxStatus, ChainError> {
            Ok(TxStatus::Pending)
        }
    }

    fn handle_with(reader: Arc<EntryPointReader>) -> SmartAccountHandle {
        let signer = Arc::new(KeySigner::from_hex(TEST_KEY).unwrap());
        let registry = DelegateRegistry::new();
        SmartAccountAdapter::new(&registry)
            .derive(signer.address(), signer, reader, SEPOLIA)
            .unwrap()
    }

    fn call(to: Address) -> BatchCall {
        BatchCall::new(to, U256::from(1), Bytes::from(vec![0xca, 0xfe]))
    }

    #[test]
    fn derive_rejects_foreign_address() {
        let signer = Arc::new(KeySigner::from_hex(TEST_KEY).unwrap());
        let registry = DelegateRegistry::new();
        let err = SmartAccountAdapter::new(&registry)
            .derive(
                Address::repeat_byte(0x11),
                signer,
                Arc::new(EntryPointReader::default()),
                SEPOLIA,
            )
            .unwrap_err();
        assert!(matches!(err, Error::AddressMismatch { .. }));
    }

    #[test]
    fn derive_rejects_unknown_chain() {
        let signer = Arc::new(KeySigner::from_hex(TEST_KEY).unwrap());
        let registry = DelegateRegistry::empty();
        let err = SmartAccountAdapter::new(&registry)
            .derive(
                signer.address(),
                signer,
                Arc::new(EntryPointReader::default()),
                SEPOLIA,
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedChain(SEPOLIA)));
    }

    #[test]
    fn derive_is_idempotent() {
        let reader = Arc::new(EntryPointReader::default());
        let a = handle_with(reader.clone());
        let b = handle_with(reader);
        assert_eq!(a.address(), b.address());
        assert_eq!(a.entry_point(), ENTRY_POINT_V07);
        assert_eq!(a.chain_id(), b.chain_id());
    }

    #[test]
    fn single_call_uses_packed_single_mode() {
        let target = address!("1111111111111111111111111111111111111111");
        let encoded = SmartAccountHandle::encode_calls(&[call(target)]);
        assert_eq!(&encoded[..4], &executeCall::SELECTOR);

        let decoded = executeCall::abi_decode(&encoded).unwrap();
        assert_eq!(decoded.mode[0], CALLTYPE_SINGLE);
        assert_eq!(decoded.executionCalldata.len(), 20 + 32 + 2);
        assert_eq!(&decoded.executionCalldata[..20], target.as_slice());
        assert_eq!(&decoded.executionCalldata[52..], &[0xca, 0xfe]);
    }

    #[test]
    fn several_calls_use_batch_mode() {
        let a = address!("1111111111111111111111111111111111111111");
        let b = address!("2222222222222222222222222222222222222222");
        let encoded = SmartAccountHandle::encode_calls(&[call(a), call(b)]);

        let decoded = executeCall::abi_decode(&encoded).unwrap();
        assert_eq!(decoded.mode[0], CALLTYPE_BATCH);

        let executions =
            Vec::<Execution>::abi_decode(&decoded.executionCalldata).unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(executions[0].target, a);
        assert_eq!(executions[1].target, b);
        assert_eq!(executions[1].callData, Bytes::from(vec![0xca, 0xfe]));
    }

    #[tokio::test]
    async fn nonce_reads_entry_point() {
        let reader = Arc::new(EntryPointReader {
            nonce: U256::from(5),
            ..Default::default()
        });
        let handle = handle_with(reader.clone());

        assert_eq!(handle.nonce().await.unwrap(), U256::from(5));

        let calls = reader.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ENTRY_POINT_V07);
        assert_eq!(&calls[0].1[..4], &getNonceCall::SELECTOR);
    }

    #[test]
    fn prepare_carries_fees_and_dummy_signature() {
        let handle = handle_with(Arc::new(EntryPointReader::default()));
        let intent = UserIntent::new(handle.address(), vec![call(Address::ZERO)])
            .unwrap()
            .with_fees(FeeQuote::new(10, 1));

        let op = handle.prepare(&intent, U256::from(3)).unwrap();
        assert_eq!(op.sender, handle.address());
        assert_eq!(op.nonce, U256::from(3));
        assert_eq!(op.max_fee_per_gas, U256::from(10));
        assert_eq!(op.max_priority_fee_per_gas, U256::from(1));
        assert_eq!(op.signature.len(), 65);
    }

    #[test]
    fn prepare_requires_fees() {
        let handle = handle_with(Arc::new(EntryPointReader::default()));
        let intent = UserIntent::new(handle.address(), vec![call(Address::ZERO)]).unwrap();
        let err = handle.prepare(&intent, U256::ZERO).unwrap_err();
        assert!(matches!(err, Error::SubmissionRejected { .. }));
    }

    #[test]
    fn signature_recovers_to_account() {
        let handle = handle_with(Arc::new(EntryPointReader::default()));
        let intent = UserIntent::new(handle.address(), vec![call(Address::ZERO)])
            .unwrap()
            .with_fees(FeeQuote::new(10, 1));
        let op = handle.prepare(&intent, U256::ZERO).unwrap();

        let raw = handle.sign(&op).unwrap();
        assert_eq!(raw.len(), 65);

        let signature = Signature::try_from(raw.as_ref()).unwrap();
        let recovered = signature
            .recover_address_from_prehash(&handle.signing_hash(&op))
            .unwrap();
        assert_eq!(recovered, handle.address());
    }

    #[test]
    fn signing_hash_depends_on_gas_fields() {
        let handle = handle_with(Arc::new(EntryPointReader::default()));
        let intent = UserIntent::new(handle.address(), vec![call(Address::ZERO)])
            .unwrap()
            .with_fees(FeeQuote::new(10, 1));
        let op = handle.prepare(&intent, U256::ZERO).unwrap();

        let mut bumped = op.clone();
        bumped.call_gas_limit = U256::from(100_000);
        assert_ne!(handle.signing_hash(&op), handle.signing_hash(&bumped));
    }
}
