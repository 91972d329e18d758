//! Connection ledger
//!
//! The authoritative, insertion-ordered collection of connections seen since
//! the last clear. Request/response events are reconciled here; every
//! mutation runs to completion under the write lock, so a single event is
//! never observed half-applied.

mod anomaly;

pub use anomaly::{AnomalyCounters, LedgerAnomaly};

use crate::models::{ConnectionRecord, RequestRecord, ResponseRecord};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const DEFAULT_CHANGE_CAPACITY: usize = 512;
const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 128;

/// How new requests reach the ordered collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Each request is appended as soon as it is ingested
    #[default]
    Immediate,
    /// Requests queue up until [`ConnectionLedger::flush_pending`] runs.
    /// A response whose request is still queued flushes the queue first, so
    /// attachment and ordering match immediate mode.
    Buffered,
}

/// Result of feeding one event to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Buffered,
    Attached,
    Rejected(LedgerAnomaly),
}

impl IngestOutcome {
    /// Whether the visible collection changed
    pub fn changed_ledger(&self) -> bool {
        matches!(self, IngestOutcome::Inserted | IngestOutcome::Attached)
    }
}

/// Notifications for observers of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LedgerChange {
    Inserted { id: String },
    Completed { id: String },
    Flushed { count: usize },
    Cleared { removed: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total: usize,
    pub completed: usize,
    /// Requests waiting for the next flush (buffered mode only)
    pub buffered: usize,
    pub anomalies: AnomalyCounters,
}

#[derive(Default)]
struct LedgerState {
    records: Vec<ConnectionRecord>,
    index: HashMap<String, usize>,
    buffered: Vec<RequestRecord>,
    buffered_ids: HashSet<String>,
    anomalies: AnomalyCounters,
}

impl LedgerState {
    fn knows(&self, id: &str) -> bool {
        self.index.contains_key(id) || self.buffered_ids.contains(id)
    }

    fn append(&mut self, req: RequestRecord) {
        self.index.insert(req.id.clone(), self.records.len());
        self.records.push(ConnectionRecord::new(req));
    }

    fn flush(&mut self) -> usize {
        let queued = std::mem::take(&mut self.buffered);
        self.buffered_ids.clear();
        let count = queued.len();
        for req in queued {
            self.append(req);
        }
        count
    }
}

pub struct ConnectionLedger {
    state: RwLock<LedgerState>,
    mode: ReconcileMode,
    changes: broadcast::Sender<LedgerChange>,
    diagnostics: broadcast::Sender<LedgerAnomaly>,
}

impl Default for ConnectionLedger {
    fn default() -> Self {
        Self::new(ReconcileMode::Immediate)
    }
}

impl ConnectionLedger {
    pub fn new(mode: ReconcileMode) -> Self {
        Self::with_capacity(mode, DEFAULT_CHANGE_CAPACITY, DEFAULT_DIAGNOSTICS_CAPACITY)
    }

    pub fn with_capacity(
        mode: ReconcileMode,
        change_capacity: usize,
        diagnostics_capacity: usize,
    ) -> Self {
        let (changes, _) = broadcast::channel(change_capacity.max(1));
        let (diagnostics, _) = broadcast::channel(diagnostics_capacity.max(1));
        Self {
            state: RwLock::new(LedgerState::default()),
            mode,
            changes,
            diagnostics,
        }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Record a newly started request. Duplicate ids are rejected.
    pub fn on_new_request(&self, req: RequestRecord) -> IngestOutcome {
        let mut state = self.write();
        if state.knows(&req.id) {
            return self.reject(&mut state, LedgerAnomaly::DuplicateRequestId { id: req.id });
        }

        match self.mode {
            ReconcileMode::Immediate => {
                let id = req.id.clone();
                tracing::debug!("New connection {} {} {}", id, req.method, req.uri);
                state.append(req);
                self.emit(LedgerChange::Inserted { id });
                IngestOutcome::Inserted
            }
            ReconcileMode::Buffered => {
                tracing::debug!("Buffered connection {} {} {}", req.id, req.method, req.uri);
                state.buffered_ids.insert(req.id.clone());
                state.buffered.push(req);
                IngestOutcome::Buffered
            }
        }
    }

    /// Attach a completed response to its connection, at most once.
    pub fn on_new_response(&self, res: ResponseRecord) -> IngestOutcome {
        let mut state = self.write();
        if state.buffered_ids.contains(&res.id) {
            let count = state.flush();
            self.emit(LedgerChange::Flushed { count });
        }

        let Some(&idx) = state.index.get(&res.id) else {
            return self.reject(&mut state, LedgerAnomaly::OrphanResponse { id: res.id });
        };
        if state.records[idx].response.is_some() {
            return self.reject(&mut state, LedgerAnomaly::DuplicateResponse { id: res.id });
        }

        let id = res.id.clone();
        tracing::debug!("Connection {} completed with status {}", id, res.status);
        state.records[idx].response = Some(res);
        self.emit(LedgerChange::Completed { id });
        IngestOutcome::Attached
    }

    /// Move buffered requests into the ordered collection. Returns how many moved.
    pub fn flush_pending(&self) -> usize {
        let mut state = self.write();
        if state.buffered.is_empty() {
            return 0;
        }
        let count = state.flush();
        self.emit(LedgerChange::Flushed { count });
        count
    }

    /// Drop every connection, buffered ones included
    pub fn clear(&self) -> usize {
        let mut state = self.write();
        let removed = state.records.len() + state.buffered.len();
        state.records.clear();
        state.index.clear();
        state.buffered.clear();
        state.buffered_ids.clear();
        self.emit(LedgerChange::Cleared { removed });
        tracing::info!("Cleared {} connections from ledger", removed);
        removed
    }

    /// Snapshot of the ordered collection
    pub fn list(&self) -> Vec<ConnectionRecord> {
        self.read().records.clone()
    }

    /// Run `f` against the ordered collection without cloning it
    pub fn with_records<R>(&self, f: impl FnOnce(&[ConnectionRecord]) -> R) -> R {
        f(&self.read().records)
    }

    pub fn get(&self, id: &str) -> Option<ConnectionRecord> {
        let state = self.read();
        state.index.get(id).map(|&idx| state.records[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.read();
        LedgerStats {
            total: state.records.len(),
            completed: state.records.iter().filter(|c| c.is_complete()).count(),
            buffered: state.buffered.len(),
            anomalies: state.anomalies,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<LedgerChange> {
        self.changes.subscribe()
    }

    /// Anomalies as they are reported
    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<LedgerAnomaly> {
        self.diagnostics.subscribe()
    }

    fn reject(&self, state: &mut LedgerState, anomaly: LedgerAnomaly) -> IngestOutcome {
        state.anomalies.record(&anomaly);
        tracing::warn!("{}", anomaly);
        let _ = self.diagnostics.send(anomaly.clone());
        IngestOutcome::Rejected(anomaly)
    }

    fn emit(&self, change: LedgerChange) {
        let _ = self.changes.send(change);
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
