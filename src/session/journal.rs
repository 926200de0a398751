//! Session journal
//!
//! Appends one JSON line per session event so flows can be traced after the
//! fact. The journal is write-only: nothing is ever read back to restore a
//! session.

use super::{Flow, SessionStatus};
use crate::error::SubmissionRef;
use crate::intent::SubmissionReceipt;
use crate::Result;
use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Entry in the journal
#[derive(Debug, Serialize)]
struct JournalEntry {
    timestamp: DateTime<Utc>,
    session_id: Uuid,
    account: Address,
    entry_type: &'static str,
    flow: Option<Flow>,
    status: SessionStatus,
    reference: Option<SubmissionRef>,
    confirmed_hash: Option<TxHash>,
    error: Option<String>,
    duration_ms: u64,
}

impl JournalEntry {
    fn new(
        session_id: Uuid,
        account: Address,
        entry_type: &'static str,
        status: SessionStatus,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            account,
            entry_type,
            flow: None,
            status,
            reference: None,
            confirmed_hash: None,
            error: None,
            duration_ms: 0,
        }
    }
}

/// Writer for journal entries
struct JournalWriter {
    path: PathBuf,
}

impl JournalWriter {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, entry: &JournalEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Append-only JSONL journal of session events
#[derive(Clone)]
pub struct SessionJournal {
    writer: Arc<Mutex<JournalWriter>>,
}

impl SessionJournal {
    /// Create a journal
    ///
    /// # Arguments
    /// * `path` - Path to the journal file (JSONL format)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(JournalWriter::new(path.into()))),
        }
    }

    pub(crate) async fn session_event(
        &self,
        session_id: Uuid,
        account: Address,
        entry_type: &'static str,
        status: SessionStatus,
    ) {
        self.append(JournalEntry::new(session_id, account, entry_type, status))
            .await;
    }

    pub(crate) async fn flow_started(&self, session_id: Uuid, account: Address, flow: Flow) {
        let mut entry = JournalEntry::new(session_id, account, "flow_start", flow.pending());
        entry.flow = Some(flow);
        self.append(entry).await;
    }

    pub(crate) async fn flow_finished(
        &self,
        session_id: Uuid,
        account: Address,
        flow: Flow,
        result: &Result<SubmissionReceipt>,
        duration_ms: u64,
    ) {
        let mut entry = JournalEntry::new(
            session_id,
            account,
            "flow_complete",
            flow.settled(result.is_ok()),
        );
        entry.flow = Some(flow);
        entry.duration_ms = duration_ms;
        match result {
            Ok(receipt) => {
                entry.reference = Some(receipt.reference.clone());
                entry.confirmed_hash = receipt.confirmed_hash;
            }
            Err(e) => {
                entry.reference = e.submission_ref().cloned();
                entry.error = Some(e.to_string());
            }
        }
        self.append(entry).await;
    }

    async fn append(&self, entry: JournalEntry) {
        let writer = self.writer.lock().await;
        if let Err(e) = writer.write(&entry) {
            // Journaling never fails a flow
            tracing::warn!(error = %e, "Failed to write journal entry");
        }
    }
}
