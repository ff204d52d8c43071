//! Append-only audit log with time and identity indexes
//!
//! # Write path
//!
//! `record_all` is the only append path. Under the append lock it:
//! 1. assigns consecutive sequence numbers,
//! 2. hands the group to the sink (failure → `AuditWrite`, nothing published),
//! 3. publishes the group to the in-memory index.
//!
//! Callers invoke it while holding whatever lock makes their own mutation
//! atomic, and apply the mutation only after it returns `Ok`. A rollback of the
//! mutation therefore never leaves an orphaned entry, and a commit always has
//! its entries.
//!
//! # Read path
//!
//! `query` snapshots the matching entries under a short read lock and returns
//! an [`AuditCursor`] that yields clones lazily, ordered by `(timestamp, seq)`.

use super::entry::AuditEntry;
use super::sink::{AuditSink, NullSink};
use chainstate_core::{EntityRef, StoreError, StoreResult, Table, Timestamp};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Which entries a query covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditScope {
    /// Every table
    All,
    /// One table
    Table(Table),
    /// One identity within a table
    Entity(EntityRef),
}

/// Half-open time window `[start, end)`; open bounds are unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    /// Inclusive lower bound
    pub start: Option<Timestamp>,
    /// Exclusive upper bound
    pub end: Option<Timestamp>,
}

impl TimeRange {
    /// Unbounded window
    pub fn all() -> Self {
        TimeRange::default()
    }

    /// `[start, end)`
    pub fn between(start: Timestamp, end: Timestamp) -> Self {
        TimeRange {
            start: Some(start),
            end: Some(end),
        }
    }

    /// `[start, ∞)`
    pub fn since(start: Timestamp) -> Self {
        TimeRange {
            start: Some(start),
            end: None,
        }
    }

    /// Whether `ts` falls in the window
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

#[derive(Default)]
struct AuditIndex {
    entries: Vec<Arc<AuditEntry>>,
    by_table: FxHashMap<Table, Vec<usize>>,
    by_entity: FxHashMap<EntityRef, Vec<usize>>,
    next_seq: u64,
}

impl AuditIndex {
    fn push(&mut self, entry: AuditEntry) {
        let pos = self.entries.len();
        self.next_seq = self.next_seq.max(entry.seq + 1);
        self.by_table.entry(entry.table).or_default().push(pos);
        self.by_entity.entry(entry.entity()).or_default().push(pos);
        self.entries.push(Arc::new(entry));
    }

    fn positions(&self, scope: &AuditScope) -> Vec<usize> {
        match scope {
            AuditScope::All => (0..self.entries.len()).collect(),
            AuditScope::Table(table) => self.by_table.get(table).cloned().unwrap_or_default(),
            AuditScope::Entity(entity) => self.by_entity.get(entity).cloned().unwrap_or_default(),
        }
    }
}

/// Append-only audit log
pub struct AuditLog {
    sink: Box<dyn AuditSink>,
    append_lock: Mutex<()>,
    index: RwLock<AuditIndex>,
}

impl AuditLog {
    /// Log backed by `sink`, starting empty
    pub fn new(sink: Box<dyn AuditSink>) -> Self {
        AuditLog {
            sink,
            append_lock: Mutex::new(()),
            index: RwLock::new(AuditIndex {
                next_seq: 1,
                ..AuditIndex::default()
            }),
        }
    }

    /// In-memory log with no durable sink
    pub fn in_memory() -> Self {
        AuditLog::new(Box::new(NullSink))
    }

    /// Log backed by `sink`, preloaded with previously committed entries
    ///
    /// Sequence numbers continue after the highest replayed one.
    pub fn with_history(sink: Box<dyn AuditSink>, history: Vec<AuditEntry>) -> Self {
        let log = AuditLog::new(sink);
        {
            let mut index = log.index.write();
            for entry in history {
                index.push(entry);
            }
        }
        log
    }

    /// Append one entry; returns its sequence number
    pub fn record(&self, entry: AuditEntry) -> StoreResult<u64> {
        let seqs = self.record_all(vec![entry])?;
        seqs.first()
            .copied()
            .ok_or_else(|| StoreError::audit_write("empty commit group"))
    }

    /// Append a commit group atomically; returns the assigned sequence numbers
    pub fn record_all(&self, mut entries: Vec<AuditEntry>) -> StoreResult<Vec<u64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(bad) = entries.iter().find(|e| !e.is_well_formed()) {
            return Err(StoreError::audit_write(format!(
                "malformed {} entry for {}",
                bad.operation,
                bad.entity()
            )));
        }

        let _guard = self.append_lock.lock();

        let first = self.index.read().next_seq;
        for (offset, entry) in entries.iter_mut().enumerate() {
            entry.seq = first + offset as u64;
        }

        self.sink.append(&entries).map_err(|e| match e {
            StoreError::AuditWrite { .. } => e,
            other => StoreError::audit_write(other.to_string()),
        })?;

        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        let mut index = self.index.write();
        for entry in entries {
            debug!(
                target: "chainstate::audit",
                seq = entry.seq,
                operation = %entry.operation,
                table = %entry.table,
                identity = %entry.identity,
                "Audit entry recorded"
            );
            index.push(entry);
        }
        Ok(seqs)
    }

    /// Entries in `scope` whose timestamp falls in `range`, ordered by time
    pub fn query(&self, scope: &AuditScope, range: TimeRange) -> AuditCursor {
        let mut matching: Vec<Arc<AuditEntry>> = {
            let index = self.index.read();
            index
                .positions(scope)
                .into_iter()
                .map(|pos| Arc::clone(&index.entries[pos]))
                .filter(|e| range.contains(e.timestamp))
                .collect()
        };
        matching.sort_by_key(|e| (e.timestamp, e.seq));
        AuditCursor {
            entries: matching,
            pos: 0,
        }
    }

    /// Convenience: every entry for one identity
    pub fn for_entity(&self, entity: &EntityRef) -> AuditCursor {
        self.query(&AuditScope::Entity(entity.clone()), TimeRange::all())
    }

    /// Number of recorded entries
    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force the sink to stable storage
    pub fn sync(&self) -> StoreResult<()> {
        let _guard = self.append_lock.lock();
        self.sink.sync()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries", &self.len())
            .finish()
    }
}

/// Snapshot of matching entries, yielded in `(timestamp, seq)` order
///
/// Finite and independent of later appends; re-run the query for a fresh view.
#[derive(Debug, Clone)]
pub struct AuditCursor {
    entries: Vec<Arc<AuditEntry>>,
    pos: usize,
}

impl AuditCursor {
    /// Entries not yet yielded
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.pos
    }
}

impl Iterator for AuditCursor {
    type Item = AuditEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.pos)?;
        self.pos += 1;
        Some(AuditEntry::clone(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl ExactSizeIterator for AuditCursor {}
