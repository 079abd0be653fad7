//! Append-only error ledger.
//!
//! Records flow through a bounded in-memory queue drained by a background
//! task, so the router's critical path never waits on the backing store.
//! A store failure is retried with backoff; an unrecoverable failure is
//! logged as a persistence event and never raised back to the caller.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use atelier_core::{AgentId, ErrorKind, ErrorRecord, JobId, OrchestratorError, RecordId, TaskId};

use crate::config::LedgerConfig;

/// Backing store for ledger records.
pub trait LedgerStore: Send + Sync {
    /// Append one record.
    fn append(&self, record: &ErrorRecord) -> Result<(), OrchestratorError>;

    /// Read back every stored record.
    fn scan(&self) -> Result<Vec<ErrorRecord>, OrchestratorError>;
}

/// Volatile in-memory store.
#[derive(Default)]
pub struct MemoryLedgerStore {
    records: RwLock<Vec<ErrorRecord>>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn append(&self, record: &ErrorRecord) -> Result<(), OrchestratorError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(record.clone());
        Ok(())
    }

    fn scan(&self) -> Result<Vec<ErrorRecord>, OrchestratorError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.clone())
    }
}

/// Durable JSON-lines store: one serialized record per line, append-only.
pub struct JsonlLedgerStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLedgerStore {
    /// Create a store over the given file path. The file is created on
    /// first append.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn persistence(reason: impl std::fmt::Display) -> OrchestratorError {
        OrchestratorError::Persistence {
            reason: reason.to_string(),
        }
    }
}

impl LedgerStore for JsonlLedgerStore {
    fn append(&self, record: &ErrorRecord) -> Result<(), OrchestratorError> {
        let line = serde_json::to_string(record).map_err(Self::persistence)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Self::persistence)?;
        writeln!(file, "{line}").map_err(Self::persistence)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<ErrorRecord>, OrchestratorError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::persistence(e)),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(Self::persistence)?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line).map_err(Self::persistence)?);
        }
        Ok(records)
    }
}

/// Query filter for ledger reads. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ErrorFilter {
    task_id: Option<TaskId>,
    agent_id: Option<AgentId>,
    job_id: Option<JobId>,
    kind: Option<ErrorKind>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

impl ErrorFilter {
    /// Match everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to one task.
    pub fn task(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Restrict to failures attributed to one agent.
    pub fn agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Restrict to items of one batch job.
    pub fn job(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Restrict to one failure kind.
    pub fn kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to records at or after the given instant.
    pub fn since(mut self, instant: DateTime<Utc>) -> Self {
        self.since = Some(instant);
        self
    }

    /// Restrict to records strictly before the given instant.
    pub fn until(mut self, instant: DateTime<Utc>) -> Self {
        self.until = Some(instant);
        self
    }

    fn matches(&self, record: &ErrorRecord) -> bool {
        if let Some(task_id) = &self.task_id {
            if record.task_id.as_ref() != Some(task_id) {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if record.context.get("agent_id").map(String::as_str) != Some(agent_id.as_str()) {
                return false;
            }
        }
        if let Some(job_id) = &self.job_id {
            if record.context.get("job_id").map(String::as_str) != Some(job_id.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.occurred_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.occurred_at >= until {
                return false;
            }
        }
        true
    }
}

enum LedgerCommand {
    Record(ErrorRecord),
    Flush(oneshot::Sender<()>),
}

type DedupKey = (Option<TaskId>, ErrorKind, DateTime<Utc>);

/// Append-only, queryable record of every failure.
pub struct ErrorLedger {
    store: Arc<dyn LedgerStore>,
    tx: mpsc::Sender<LedgerCommand>,
    /// Dedup keys for every record this process has written. Grows with
    /// the ledger itself; retention and rotation are the store operator's
    /// concern, so the set is not windowed here.
    seen: Mutex<HashSet<DedupKey>>,
}

impl ErrorLedger {
    /// Create a ledger over the given store and spawn its drain task.
    /// Must be called within a tokio runtime.
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        tokio::spawn(drain(store.clone(), rx, config));
        Self {
            store,
            tx,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Queue a record for persistence.
    ///
    /// Always succeeds from the caller's perspective. Re-recording the
    /// same logical error (task id + kind + occurrence time) is
    /// deduplicated at write time and returns the same outcome.
    pub async fn record(&self, record: ErrorRecord) -> RecordId {
        let id = record.id.clone();

        {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            if !seen.insert(record.dedup_key()) {
                return id;
            }
        }

        if self.tx.send(LedgerCommand::Record(record)).await.is_err() {
            // Drain task gone; this is a shutdown path, not a data path.
            warn!("Ledger drain task stopped; record buffered nowhere");
        }
        id
    }

    /// Wait until every queued record reached the store (or was declared
    /// unrecoverable). Intended for tests and shutdown.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LedgerCommand::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Query stored records, ordered by occurrence time. Bounded by
    /// ledger size; the returned vector is restartable by construction.
    pub fn query(&self, filter: &ErrorFilter) -> Result<Vec<ErrorRecord>, OrchestratorError> {
        let mut records: Vec<ErrorRecord> = self
            .store
            .scan()?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        records.sort_by_key(|record| record.occurred_at);
        Ok(records)
    }
}

async fn drain(
    store: Arc<dyn LedgerStore>,
    mut rx: mpsc::Receiver<LedgerCommand>,
    config: LedgerConfig,
) {
    while let Some(command) = rx.recv().await {
        match command {
            LedgerCommand::Record(record) => {
                persist_with_retry(store.as_ref(), &record, &config).await;
            }
            LedgerCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn persist_with_retry(store: &dyn LedgerStore, record: &ErrorRecord, config: &LedgerConfig) {
    let mut attempt = 0u32;
    loop {
        match store.append(record) {
            Ok(()) => return,
            Err(e) if attempt < config.append_retries => {
                attempt += 1;
                let delay = config.backoff_base * 2u32.saturating_pow(attempt - 1);
                warn!(
                    record_id = %record.id,
                    attempt,
                    error = %e,
                    "Ledger append failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                // Unrecoverable: surfaces as a loggable persistence event,
                // never back to the router.
                error!(
                    record_id = %record.id,
                    kind = record.kind.as_str(),
                    error = %e,
                    "Ledger record dropped after exhausting retries"
                );
                return;
            }
        }
    }
}
