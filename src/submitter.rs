//! Batched intent submission
//!
//! Strictly ordered per attempt: validate the calls, read the entry-point
//! nonce, fetch a fresh fee quote, build the operation, let the relay plan
//! gas (and sponsor it), sign, submit, then poll the relay for a receipt.

use crate::account::SmartAccountHandle;
use crate::config::PollSettings;
use crate::error::SubmissionRef;
use crate::gas::GasPriceOracle;
use crate::intent::{BatchCall, IntentId, ReceiptStatus, SubmissionReceipt, UserIntent};
use crate::poll::{poll_until, CancelToken, PollOutcome};
use crate::relay::{ReceiptPoll, Relay};
use crate::{Error, Result};

/// Submits intents for one smart account through one relay
pub struct IntentSubmitter<'a> {
    account: &'a SmartAccountHandle,
    oracle: &'a dyn GasPriceOracle,
    relay: &'a dyn Relay,
    polling: PollSettings,
}

impl<'a> IntentSubmitter<'a> {
    pub fn new(
        account: &'a SmartAccountHandle,
        oracle: &'a dyn GasPriceOracle,
        relay: &'a dyn Relay,
    ) -> Self {
        Self {
            account,
            oracle,
            relay,
            polling: PollSettings::default(),
        }
    }

    pub fn with_polling(mut self, polling: PollSettings) -> Self {
        self.polling = polling;
        self
    }

    /// Submit `calls` as one intent and wait for the relay's receipt
    pub async fn submit(
        &self,
        calls: Vec<BatchCall>,
        cancel: &CancelToken,
    ) -> Result<SubmissionReceipt> {
        let id = self.send(calls).await?;
        self.await_receipt(&id, cancel).await
    }

    /// Everything up to and including the hand-off to the relay
    pub async fn send(&self, calls: Vec<BatchCall>) -> Result<IntentId> {
        let intent = UserIntent::new(self.account.address(), calls)?;
        let entry_point = self.account.entry_point();

        let nonce = self.account.nonce().await?;
        let quote = self.oracle.quote().await?;
        let intent = intent.with_fees(quote);

        let mut op = self.account.prepare(&intent, nonce)?;
        self.relay
            .gas_plan(&op, entry_point)
            .await
            .map_err(|e| Error::rejected(e.to_string()))?
            .apply(&mut op);
        op.signature = self.account.sign(&op)?;

        let id = self
            .relay
            .submit(&op, entry_point)
            .await
            .map_err(|e| Error::rejected(e.to_string()))?;

        tracing::info!(
            intent = %id,
            sender = %op.sender,
            calls = intent.calls.len(),
            %nonce,
            max_fee = quote.max_fee_per_unit,
            "Intent submitted"
        );
        Ok(id)
    }

    /// Poll the relay until the intent is confirmed or failed
    ///
    /// Query errors are logged and treated as still pending.
    pub async fn await_receipt(
        &self,
        id: &IntentId,
        cancel: &CancelToken,
    ) -> Result<SubmissionReceipt> {
        let reference = SubmissionRef::Intent(id.to_string());

        let outcome = poll_until(self.polling, cancel, |attempt| async move {
            match self.relay.poll_receipt(id).await {
                Ok(poll) if poll.status == ReceiptStatus::Pending => {
                    tracing::debug!(intent = %id, attempt, "Intent pending");
                    None
                }
                // A success is only final once it names the including transaction
                Ok(ReceiptPoll {
                    status: ReceiptStatus::Confirmed,
                    hash: None,
                    ..
                }) => {
                    tracing::warn!(
                        intent = %id,
                        attempt,
                        "Confirmed receipt without a transaction hash"
                    );
                    None
                }
                Ok(poll) => Some(poll),
                Err(e) => {
                    tracing::warn!(intent = %id, attempt, error = %e, "Receipt query failed");
                    None
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(ReceiptPoll {
                status: ReceiptStatus::Failed,
                hash,
                reason,
            }) => {
                let reason = reason.unwrap_or_else(|| "intent failed".to_string());
                let reason = match hash {
                    Some(hash) => format!("{} (transaction {})", reason, hash),
                    None => reason,
                };
                Err(Error::SubmissionRejected {
                    reason,
                    reference: Some(reference),
                })
            }
            PollOutcome::Ready(poll) => {
                tracing::info!(intent = %id, hash = ?poll.hash, "Intent confirmed");
                Ok(SubmissionReceipt {
                    reference,
                    confirmed_hash: poll.hash,
                    status: ReceiptStatus::Confirmed,
                })
            }
            PollOutcome::TimedOut => Err(Error::SubmissionTimeout { reference }),
            PollOutcome::Cancelled => {
                tracing::info!(intent = %id, "Stopped polling; intent stays submitted");
                Err(Error::PollingCancelled { reference })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::account::SmartAccountAdapter;
    use crate::authorization::tests::{FakeChain, SEPOLIA, TEST_KEY};
    use crate::gas::FeeQuote;
    use crate::registry::DelegateRegistry;
    use crate::relay::{GasPlan, RelayError, UserOperation};
    use crate::wallet::KeySigner;
    use alloy::primitives::{b256, Address, Bytes, TxHash, U256};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    pub const H: TxHash = b256!("3333333333333333333333333333333333333333333333333333333333333333");

    /// Quote n (1-based) is `{10n, n}`
    #[derive(Default)]
    pub struct RisingOracle {
        pub calls: AtomicU32,
        pub unavailable: bool,
    }

    #[async_trait]
    impl GasPriceOracle for RisingOracle {
        async fn quote(&self) -> Result<FeeQuote> {
            if self.unavailable {
                return Err(Error::OracleUnavailable("503".to_string()));
            }
            let n = u128::from(self.calls.fetch_add(1, Ordering::SeqCst) + 1);
            Ok(FeeQuote::new(10 * n, n))
        }
    }

    /// Relay fake answering intent id "abc" and replaying scripted polls
    #[derive(Default)]
    pub struct FakeRelay {
        pub submitted: Mutex<Vec<UserOperation>>,
        pub polls: Mutex<VecDeque<std::result::Result<ReceiptPoll, RelayError>>>,
        pub reject_with: Option<String>,
    }

    impl FakeRelay {
        pub fn with_polls(polls: impl IntoIterator<Item = ReceiptPoll>) -> Self {
            Self {
                polls: Mutex::new(polls.into_iter().map(Ok).collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Relay for FakeRelay {
        async fn gas_plan(
            &self,
            _: &UserOperation,
            _: Address,
        ) -> std::result::Result<GasPlan, RelayError> {
            Ok(GasPlan {
                call_gas_limit: U256::from(50_000),
                verification_gas_limit: U256::from(100_000),
                pre_verification_gas: U256::from(21_000),
                ..Default::default()
            })
        }

        async fn submit(
            &self,
            op: &UserOperation,
            _: Address,
        ) -> std::result::Result<IntentId, RelayError> {
            if let Some(reason) = &self.reject_with {
                return Err(RelayError::Rejected(reason.clone()));
            }
            self.submitted.lock().unwrap().push(op.clone());
            Ok(IntentId::from("abc"))
        }

        async fn poll_receipt(
            &self,
            _: &IntentId,
        ) -> std::result::Result<ReceiptPoll, RelayError> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ReceiptPoll::pending()))
        }
    }

    pub fn fast_polling() -> PollSettings {
        PollSettings {
            interval_ms: 100,
            timeout_ms: 1_000,
        }
    }

    fn handle() -> SmartAccountHandle {
        let signer = Arc::new(KeySigner::from_hex(TEST_KEY).unwrap());
        let registry = DelegateRegistry::new();
        SmartAccountAdapter::new(&registry)
            .derive(signer.address(), signer, Arc::new(FakeChain::default()), SEPOLIA)
            .unwrap()
    }

    fn zero_call() -> Vec<BatchCall> {
        vec![BatchCall::new(Address::ZERO, U256::ZERO, Bytes::new())]
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pending_confirmed() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay::with_polls([
            ReceiptPoll::pending(),
            ReceiptPoll::pending(),
            ReceiptPoll::confirmed(H),
        ]);
        let submitter =
            IntentSubmitter::new(&account, &oracle, &relay).with_polling(fast_polling());

        let receipt = submitter
            .submit(zero_call(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Confirmed);
        assert_eq!(receipt.confirmed_hash, Some(H));
        assert_eq!(receipt.reference, SubmissionRef::Intent("abc".to_string()));

        let submitted = relay.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].max_fee_per_gas, U256::from(10));
        assert_eq!(submitted[0].max_priority_fee_per_gas, U256::from(1));
        assert_eq!(submitted[0].call_gas_limit, U256::from(50_000));
        assert_eq!(submitted[0].signature.len(), 65);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_without_hash_keeps_polling() {
        let account = handle();
        let oracle = RisingOracle::default();
        let hashless = ReceiptPoll {
            status: ReceiptStatus::Confirmed,
            hash: None,
            reason: None,
        };
        let relay = FakeRelay::with_polls([hashless.clone(), ReceiptPoll::confirmed(H)]);
        let submitter =
            IntentSubmitter::new(&account, &oracle, &relay).with_polling(fast_polling());

        let receipt = submitter
            .submit(zero_call(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(receipt.confirmed_hash, Some(H));

        // never anything but a hashless success: the ceiling is reached
        let relay = FakeRelay::with_polls(std::iter::repeat(hashless).take(20));
        let submitter =
            IntentSubmitter::new(&account, &oracle, &relay).with_polling(fast_polling());
        let err = submitter
            .submit(zero_call(), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SubmissionTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_uses_a_fresh_quote() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay::with_polls([ReceiptPoll::confirmed(H), ReceiptPoll::confirmed(H)]);
        let submitter =
            IntentSubmitter::new(&account, &oracle, &relay).with_polling(fast_polling());

        for _ in 0..2 {
            submitter
                .submit(zero_call(), &CancelToken::never())
                .await
                .unwrap();
        }

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
        let submitted = relay.submitted.lock().unwrap();
        assert_eq!(submitted[0].max_fee_per_gas, U256::from(10));
        assert_eq!(submitted[1].max_fee_per_gas, U256::from(20));
        assert_eq!(submitted[1].max_priority_fee_per_gas, U256::from(2));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retains_intent_id() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay::default();
        let submitter =
            IntentSubmitter::new(&account, &oracle, &relay).with_polling(fast_polling());

        let err = submitter
            .submit(zero_call(), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SubmissionTimeout { .. }));
        assert_eq!(
            err.submission_ref(),
            Some(&SubmissionRef::Intent("abc".to_string()))
        );
    }

    #[tokio::test]
    async fn empty_intent_never_quotes() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay::default();
        let submitter = IntentSubmitter::new(&account, &oracle, &relay);

        let err = submitter
            .submit(Vec::new(), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyIntent));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
        assert!(relay.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oracle_failure_is_surfaced() {
        let account = handle();
        let oracle = RisingOracle {
            unavailable: true,
            ..Default::default()
        };
        let relay = FakeRelay::default();
        let submitter = IntentSubmitter::new(&account, &oracle, &relay);

        let err = submitter.send(zero_call()).await.unwrap_err();
        assert!(matches!(err, Error::OracleUnavailable(_)));
        assert!(relay.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn relay_rejection_carries_reason() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay {
            reject_with: Some("AA21 didn't pay prefund".to_string()),
            ..Default::default()
        };
        let submitter = IntentSubmitter::new(&account, &oracle, &relay);

        match submitter.send(zero_call()).await.unwrap_err() {
            Error::SubmissionRejected { reason, reference } => {
                assert!(reason.contains("AA21"));
                assert!(reference.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_receipt_is_rejected_with_intent() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay::with_polls([ReceiptPoll::failed(Some(H), "execution reverted")]);
        let submitter =
            IntentSubmitter::new(&account, &oracle, &relay).with_polling(fast_polling());

        let err = submitter
            .submit(zero_call(), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("execution reverted"));
        assert_eq!(
            err.submission_ref(),
            Some(&SubmissionRef::Intent("abc".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn query_errors_keep_polling() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay::default();
        relay.polls.lock().unwrap().extend([
            Err(RelayError::Transport("timeout".to_string())),
            Ok(ReceiptPoll::confirmed(H)),
        ]);
        let submitter =
            IntentSubmitter::new(&account, &oracle, &relay).with_polling(fast_polling());

        let receipt = submitter
            .submit(zero_call(), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(receipt.confirmed_hash, Some(H));
    }

    #[tokio::test]
    async fn cancellation_is_local() {
        let account = handle();
        let oracle = RisingOracle::default();
        let relay = FakeRelay::default();
        let submitter = IntentSubmitter::new(&account, &oracle, &relay);
        let (handle, token) = crate::poll::cancel_pair();
        handle.cancel();

        let err = submitter.submit(zero_call(), &token).await.unwrap_err();
        assert!(matches!(err, Error::PollingCancelled { .. }));
        assert_eq!(err.tag(), "polling-cancelled");
        // the intent itself went out
        assert_eq!(relay.submitted.lock().unwrap().len(), 1);
    }
}
