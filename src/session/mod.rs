//! Session controller
//!
//! Top-level state machine. A session exists once a credential has been
//! loaded; on top of it the authorization flow and the batch flow each run
//! at most once at a time. The two kinds may overlap.
//!
//! ```text
//! Uninitialized -> Ready -> AuthorizationPending -> AuthorizationConfirmed | AuthorizationFailed
//!                        -> BatchPending         -> BatchConfirmed         | BatchFailed
//! ```
//!
//! Every handler awaits its flow to the end, so callers never get back a
//! Pending state. Observers that want to see Pending subscribe to status
//! changes.

mod journal;

pub use journal::SessionJournal;

use crate::account::SmartAccountAdapter;
use crate::authorization::AuthorizationFlow;
use crate::chain::{ChainReader, ChainWriter};
use crate::config::{Config, PollSettings};
use crate::gas::GasPriceOracle;
use crate::intent::{BatchCall, SubmissionReceipt};
use crate::poll::{cancel_pair, CancelHandle, CancelToken};
use crate::registry::DelegateRegistry;
use crate::relay::Relay;
use crate::submitter::IntentSubmitter;
use crate::wallet::{Credential, ExecutorMode, KeySigner};
use crate::{Error, Result};
use alloy::primitives::Address;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capacity of the status change channel
const EVENT_CAPACITY: usize = 64;

/// Latest transition of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Ready,
    AuthorizationPending,
    AuthorizationConfirmed,
    AuthorizationFailed,
    BatchPending,
    BatchConfirmed,
    BatchFailed,
}

/// The two kinds of flow a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Authorization,
    Batch,
}

impl Flow {
    fn pending(self) -> SessionStatus {
        match self {
            Flow::Authorization => SessionStatus::AuthorizationPending,
            Flow::Batch => SessionStatus::BatchPending,
        }
    }

    fn settled(self, ok: bool) -> SessionStatus {
        match (self, ok) {
            (Flow::Authorization, true) => SessionStatus::AuthorizationConfirmed,
            (Flow::Authorization, false) => SessionStatus::AuthorizationFailed,
            (Flow::Batch, true) => SessionStatus::BatchConfirmed,
            (Flow::Batch, false) => SessionStatus::BatchFailed,
        }
    }

    fn already_pending(self) -> Error {
        match self {
            Flow::Authorization => Error::AuthorizationAlreadyPending,
            Flow::Batch => Error::BatchAlreadyPending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending,
    Settled,
}

/// Status change pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub status: SessionStatus,
    pub account: Option<Address>,
}

/// Read-only projection for presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub account: Option<Address>,
    pub credential_ref: Option<String>,
    pub last_receipt: Option<SubmissionReceipt>,
    pub last_error: Option<&'static str>,
}

struct Session {
    id: Uuid,
    credential_ref: String,
    signer: Arc<KeySigner>,
    status: SessionStatus,
    authorization: Phase,
    batch: Phase,
    batch_cancel: Option<CancelHandle>,
    last_receipt: Option<SubmissionReceipt>,
    last_error: Option<&'static str>,
}

impl Session {
    fn new(credential_ref: String, signer: KeySigner) -> Self {
        Self {
            id: Uuid::new_v4(),
            credential_ref,
            signer: Arc::new(signer),
            status: SessionStatus::Ready,
            authorization: Phase::Idle,
            batch: Phase::Idle,
            batch_cancel: None,
            last_receipt: None,
            last_error: None,
        }
    }

    fn account(&self) -> Address {
        self.signer.address()
    }

    fn phase_mut(&mut self, flow: Flow) -> &mut Phase {
        match flow {
            Flow::Authorization => &mut self.authorization,
            Flow::Batch => &mut self.batch,
        }
    }

    fn pending_flow(&self) -> Option<Flow> {
        if self.authorization == Phase::Pending {
            Some(Flow::Authorization)
        } else if self.batch == Phase::Pending {
            Some(Flow::Batch)
        } else {
            None
        }
    }
}

/// Handles to every external collaborator, passed in explicitly
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn ChainReader>,
    pub writer: Arc<dyn ChainWriter>,
    pub oracle: Arc<dyn GasPriceOracle>,
    pub relay: Arc<dyn Relay>,
    pub registry: Arc<DelegateRegistry>,
}

/// What a started flow needs once the lock is released
struct Started {
    session_id: Uuid,
    signer: Arc<KeySigner>,
    at: Instant,
}

/// Everything behind the controller lock
#[derive(Default)]
struct State {
    session: Option<Session>,
    /// Accounts with an authorization in flight; outlives the session that
    /// started it
    authorizing: HashSet<Address>,
}

/// The part of the controller a running flow task settles into
#[derive(Clone)]
struct Shared {
    state: Arc<RwLock<State>>,
    events: broadcast::Sender<StatusChange>,
    journal: Option<SessionJournal>,
}

impl Shared {
    /// Settle `flow` with its result
    ///
    /// If the session was dropped or replaced meanwhile, the result is only
    /// handed back to the caller.
    async fn finish(
        &self,
        flow: Flow,
        started: Started,
        result: Result<SubmissionReceipt>,
    ) -> Result<SubmissionReceipt> {
        let status = flow.settled(result.is_ok());
        let account = started.signer.address();

        let current = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            if flow == Flow::Authorization {
                state.authorizing.remove(&account);
            }
            match state
                .session
                .as_mut()
                .filter(|s| s.id == started.session_id)
            {
                Some(session) => {
                    *session.phase_mut(flow) = Phase::Settled;
                    session.status = status;
                    if flow == Flow::Batch {
                        session.batch_cancel = None;
                    }
                    match &result {
                        Ok(receipt) => {
                            session.last_receipt = Some(receipt.clone());
                            session.last_error = None;
                        }
                        Err(e) => session.last_error = Some(e.tag()),
                    }
                    true
                }
                None => false,
            }
        };

        match &result {
            Ok(receipt) => tracing::info!(
                ?flow,
                %account,
                reference = %receipt.reference,
                "Flow confirmed"
            ),
            Err(e) => tracing::warn!(?flow, %account, error = %e, tag = e.tag(), "Flow failed"),
        }

        if current {
            self.emit(status, Some(account));
        }
        if let Some(journal) = &self.journal {
            let duration_ms = started.at.elapsed().as_millis() as u64;
            journal
                .flow_finished(started.session_id, account, flow, &result, duration_ms)
                .await;
        }
        result
    }

    fn emit(&self, status: SessionStatus, account: Option<Address>) {
        // No subscribers is fine
        let _ = self.events.send(StatusChange { status, account });
    }
}

/// Wait for a flow task; a panic inside the flow resumes in the caller
async fn join_flow(task: JoinHandle<Result<SubmissionReceipt>>) -> Result<SubmissionReceipt> {
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(Error::rejected(format!("flow task stopped: {}", e))),
    }
}

/// Owns the single active session and drives its flows
///
/// Each flow runs on its own task. Dropping the future a handler returned
/// only stops waiting for it; the flow still settles into the session.
pub struct SessionController {
    deps: Collaborators,
    chain_id: u64,
    executor: ExecutorMode,
    polling: PollSettings,
    shared: Shared,
}

impl SessionController {
    pub fn new(deps: Collaborators, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            deps,
            chain_id,
            executor: ExecutorMode::default(),
            polling: PollSettings::default(),
            shared: Shared {
                state: Arc::new(RwLock::new(State::default())),
                events,
                journal: None,
            },
        }
    }

    /// Controller configured from the loaded config
    pub fn from_config(config: &Config, deps: Collaborators) -> Self {
        let controller = Self::new(deps, config.chain_id)
            .with_executor(config.executor)
            .with_polling(config.polling);
        match &config.journal_path {
            Some(path) => controller.with_journal(SessionJournal::new(path)),
            None => controller,
        }
    }

    pub fn with_executor(mut self, executor: ExecutorMode) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_polling(mut self, polling: PollSettings) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_journal(mut self, journal: SessionJournal) -> Self {
        self.shared.journal = Some(journal);
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Receive every status change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.shared.events.subscribe()
    }

    pub async fn view(&self) -> SessionView {
        let guard = self.shared.state.read().await;
        match guard.session.as_ref() {
            None => SessionView {
                status: SessionStatus::Uninitialized,
                account: None,
                credential_ref: None,
                last_receipt: None,
                last_error: None,
            },
            Some(session) => SessionView {
                status: session.status,
                account: Some(session.account()),
                credential_ref: Some(session.credential_ref.clone()),
                last_receipt: session.last_receipt.clone(),
                last_error: session.last_error,
            },
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.view().await.status
    }

    /// Load a credential and establish the session
    ///
    /// Loading the same credential again returns the same account and leaves
    /// the session untouched. A different credential replaces the session,
    /// but only while no flow is pending.
    pub async fn create_session(&self, credential: &Credential) -> Result<Address> {
        let signer = KeySigner::initialize(credential)?;
        let account = signer.address();

        let session_id = {
            let mut guard = self.shared.state.write().await;
            if let Some(existing) = guard.session.as_mut() {
                if existing.account() == account {
                    return Ok(account);
                }
                if let Some(flow) = existing.pending_flow() {
                    let err = flow.already_pending();
                    existing.last_error = Some(err.tag());
                    return Err(err);
                }
            }
            let session = Session::new(credential.source().to_string(), signer);
            let id = session.id;
            guard.session = Some(session);
            id
        };

        tracing::info!(%account, source = credential.source(), "Session created");
        self.shared.emit(SessionStatus::Ready, Some(account));
        if let Some(journal) = &self.shared.journal {
            journal
                .session_event(session_id, account, "session_created", SessionStatus::Ready)
                .await;
        }
        Ok(account)
    }

    /// Drop the session; a batch still being polled stops polling
    ///
    /// An authorization already broadcast keeps being tracked, and the
    /// account cannot start another one until it settles.
    pub async fn disconnect(&self) {
        let Some(mut session) = self.shared.state.write().await.session.take() else {
            return;
        };
        if let Some(cancel) = session.batch_cancel.take() {
            cancel.cancel();
        }

        let account = session.account();
        tracing::info!(%account, "Session disconnected");
        self.shared.emit(SessionStatus::Uninitialized, None);
        if let Some(journal) = &self.shared.journal {
            journal
                .session_event(session.id, account, "disconnected", SessionStatus::Uninitialized)
                .await;
        }
    }

    /// Delegate the account and wait until the delegation is on-chain
    pub async fn send_authorization(&self) -> Result<SubmissionReceipt> {
        let started = self.begin(Flow::Authorization, None).await?;

        let deps = self.deps.clone();
        let shared = self.shared.clone();
        let (chain_id, executor, polling) = (self.chain_id, self.executor, self.polling);

        let task = tokio::spawn(async move {
            let result = AuthorizationFlow::new(
                &started.signer,
                deps.reader.as_ref(),
                deps.writer.as_ref(),
                &deps.registry,
            )
            .with_polling(polling)
            .run(chain_id, executor, &CancelToken::never())
            .await;

            shared.finish(Flow::Authorization, started, result).await
        });
        join_flow(task).await
    }

    /// Submit `calls` as one intent; [`abort_batch`](Self::abort_batch)
    /// stops the wait for its receipt
    pub async fn send_batch(&self, calls: Vec<BatchCall>) -> Result<SubmissionReceipt> {
        let (handle, token) = cancel_pair();
        self.run_batch(calls, token, Some(handle)).await
    }

    /// Submit `calls` as one intent, polling until `cancel` fires
    pub async fn send_batch_cancellable(
        &self,
        calls: Vec<BatchCall>,
        cancel: CancelToken,
    ) -> Result<SubmissionReceipt> {
        self.run_batch(calls, cancel, None).await
    }

    /// Stop polling the pending batch; returns whether there was one
    pub async fn abort_batch(&self) -> bool {
        let guard = self.shared.state.read().await;
        match guard.session.as_ref().and_then(|s| s.batch_cancel.as_ref()) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_batch(
        &self,
        calls: Vec<BatchCall>,
        cancel: CancelToken,
        handle: Option<CancelHandle>,
    ) -> Result<SubmissionReceipt> {
        let started = self.begin(Flow::Batch, handle).await?;

        let deps = self.deps.clone();
        let shared = self.shared.clone();
        let (chain_id, polling) = (self.chain_id, self.polling);

        let task = tokio::spawn(async move {
            let result = async {
                let account = SmartAccountAdapter::new(&deps.registry).derive(
                    started.signer.address(),
                    started.signer.clone(),
                    deps.reader.clone(),
                    chain_id,
                )?;
                IntentSubmitter::new(&account, deps.oracle.as_ref(), deps.relay.as_ref())
                    .with_polling(polling)
                    .submit(calls, &cancel)
                    .await
            }
            .await;

            shared.finish(Flow::Batch, started, result).await
        });
        join_flow(task).await
    }

    /// Move `flow` to Pending, or refuse if it already is
    async fn begin(&self, flow: Flow, cancel: Option<CancelHandle>) -> Result<Started> {
        let (started, account) = {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            let session = state.session.as_mut().ok_or(Error::SessionNotReady)?;
            let account = session.account();

            let in_flight = *session.phase_mut(flow) == Phase::Pending
                || (flow == Flow::Authorization && state.authorizing.contains(&account));
            if in_flight {
                let err = flow.already_pending();
                session.last_error = Some(err.tag());
                return Err(err);
            }

            *session.phase_mut(flow) = Phase::Pending;
            session.status = flow.pending();
            match flow {
                Flow::Authorization => {
                    state.authorizing.insert(account);
                }
                Flow::Batch => session.batch_cancel = cancel,
            }
            (
                Started {
                    session_id: session.id,
                    signer: session.signer.clone(),
                    at: Instant::now(),
                },
                account,
            )
        };

        tracing::debug!(?flow, %account, "Flow started");
        self.shared.emit(flow.pending(), Some(account));
        if let Some(journal) = &self.shared.journal {
            journal.flow_started(started.session_id, account, flow).await;
        }
        Ok(started)
    }
}
