//! Versioned store
//!
//! `VersionedStore<K, P>` keeps one [`VersionChain`] per identity and
//! enforces supersession: inserting a version for an identity that already
//! has an open version closes that version at the new `valid_from`, within
//! the same unit of work and the same audit commit group.
//!
//! # Concurrency
//!
//! - Identities live in a `DashMap`; distinct identities never share a lock
//!   on the write path beyond the map shard lookup.
//! - Each identity has a writer mutex. Writers wait at most `lock_timeout`
//!   for it and report `IdentityConflict` otherwise.
//! - The chain sits behind a `RwLock` that writers take only to append or
//!   close the tail in place, after the audit append. Readers never wait on a
//!   writer's audit I/O and never see a half-applied supersession.
//! - Batches lock their identities in key order.
//!
//! # Commit order
//!
//! validate against the tail → append audit group → apply to the chain. A
//! failed audit append leaves the chain untouched, and an identity whose
//! first write failed leaves no entry behind.

use crate::chain::{self, VersionChain};
use crate::context::StoreContext;
use chainstate_core::{
    EntityRef, IdentityKey, Payload, Principal, RecordId, RowSnapshot, StoreError, StoreResult,
    Table, Timestamp, VersionedRecord,
};
use chainstate_durability::{AuditEntry, AuditLog, AuditOperation};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Audit entries of a single-identity write: at most one close and one insert
type EntryGroup = SmallVec<[AuditEntry; 2]>;

/// Batch writes grouped by identity: (input position, payload, valid_from)
type Grouped<K, P> = BTreeMap<K, Vec<(usize, P, Timestamp)>>;

struct ChainCell<K, P> {
    writer: Mutex<()>,
    published: RwLock<Arc<VersionChain<K, P>>>,
}

impl<K: Clone, P: Clone> ChainCell<K, P> {
    fn new() -> Self {
        Self::with_chain(VersionChain::new())
    }

    fn with_chain(chain: VersionChain<K, P>) -> Self {
        ChainCell {
            writer: Mutex::new(()),
            published: RwLock::new(Arc::new(chain)),
        }
    }

    fn snapshot(&self) -> Arc<VersionChain<K, P>> {
        Arc::clone(&*self.published.read())
    }

    fn latest(&self) -> Option<Arc<VersionedRecord<K, P>>> {
        self.published.read().latest().cloned()
    }

    fn is_empty(&self) -> bool {
        self.published.read().is_empty()
    }

    /// Change the chain in place; copies only while a snapshot is held elsewhere
    fn apply(&self, change: impl FnOnce(&mut VersionChain<K, P>)) {
        let mut published = self.published.write();
        change(Arc::make_mut(&mut *published));
    }
}

/// One pending write of a batch
#[derive(Debug, Clone)]
pub struct PendingVersion<K, P> {
    /// Identity written to
    pub identity: K,
    /// New content
    pub payload: P,
    /// Instant the new version becomes authoritative
    pub valid_from: Timestamp,
}

impl<K, P> PendingVersion<K, P> {
    /// Pending write
    pub fn new(identity: K, payload: P, valid_from: Timestamp) -> Self {
        PendingVersion {
            identity,
            payload,
            valid_from,
        }
    }
}

/// Temporal store for one table
pub struct VersionedStore<K: IdentityKey, P: Payload> {
    table: Table,
    cells: DashMap<K, Arc<ChainCell<K, P>>>,
    next_id: AtomicU64,
    ctx: StoreContext,
}

impl<K: IdentityKey, P: Payload> VersionedStore<K, P> {
    /// Empty store for `table`
    pub fn new(table: Table, ctx: StoreContext) -> Self {
        VersionedStore {
            table,
            cells: DashMap::new(),
            next_id: AtomicU64::new(1),
            ctx,
        }
    }

    /// Table this store tracks
    pub fn table(&self) -> Table {
        self.table
    }

    /// Audit log mutations are recorded in
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.ctx.audit
    }

    /// Continue record ids after `last`
    pub fn resume_ids_after(&self, last: RecordId) {
        self.next_id.fetch_max(last.0.saturating_add(1), Ordering::AcqRel);
    }

    /// Reference used in errors and audit entries
    pub fn entity_ref(&self, identity: &K) -> EntityRef {
        EntityRef::new(self.table, identity.key_string())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Record `payload` as the state of `identity` from `valid_from` on
    ///
    /// Closes the identity's open version at `valid_from`. Fails with
    /// `OutOfOrderWrite` if `valid_from` does not advance the chain.
    pub fn insert(
        &self,
        identity: K,
        payload: P,
        valid_from: Timestamp,
        principal: &Principal,
    ) -> StoreResult<VersionedRecord<K, P>> {
        self.insert_linked(identity, payload, valid_from, principal, |_, _| {})
    }

    /// [`VersionedStore::insert`] with a hook that sees the open version
    ///
    /// `link` runs under the identity's writer lock, after validation, with
    /// the payload being superseded (if any).
    pub fn insert_linked<F>(
        &self,
        identity: K,
        payload: P,
        valid_from: Timestamp,
        principal: &Principal,
        link: F,
    ) -> StoreResult<VersionedRecord<K, P>>
    where
        F: FnOnce(&mut P, Option<&P>),
    {
        self.ctx.liveness.check()?;
        let key = identity.clone();
        let result = self.insert_one(identity, payload, valid_from, principal, link);
        if result.is_err() {
            self.discard_if_empty(&key);
        }
        result
    }

    fn insert_one<F>(
        &self,
        identity: K,
        payload: P,
        valid_from: Timestamp,
        principal: &Principal,
        link: F,
    ) -> StoreResult<VersionedRecord<K, P>>
    where
        F: FnOnce(&mut P, Option<&P>),
    {
        let entity = self.entity_ref(&identity);
        let cell = self.cell(&identity);
        let _writer = self.lock_writer(&cell, &entity)?;

        let now = self.ctx.clock.now();
        let mut tail = cell.latest();
        let mut entries = EntryGroup::new();
        let record = self.stage(
            &mut tail,
            identity,
            payload,
            valid_from,
            now,
            &entity,
            principal,
            link,
            &mut entries,
        )?;

        self.ctx.audit.record_all(entries.into_vec())?;
        cell.apply(|chain| {
            chain.push(record.clone(), now);
        });

        debug!(
            target: "chainstate::storage",
            table = %self.table,
            identity = %entity.identity,
            record_id = record.id.0,
            valid_from = %valid_from,
            "Version inserted"
        );
        Ok(record)
    }

    /// Insert several versions as one unit of work
    ///
    /// Either every write is applied or none is. Writes to the same identity
    /// are applied in input order and must advance its chain in that order.
    /// Records are returned in input order.
    pub fn insert_batch(
        &self,
        writes: Vec<PendingVersion<K, P>>,
        principal: &Principal,
    ) -> StoreResult<Vec<VersionedRecord<K, P>>> {
        self.insert_batch_linked(writes, principal, |_, _| {})
    }

    /// [`VersionedStore::insert_batch`] with a link hook applied per write
    pub fn insert_batch_linked<F>(
        &self,
        writes: Vec<PendingVersion<K, P>>,
        principal: &Principal,
        link: F,
    ) -> StoreResult<Vec<VersionedRecord<K, P>>>
    where
        F: Fn(&mut P, Option<&P>),
    {
        self.ctx.liveness.check()?;
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let total = writes.len();

        // Group by identity; BTreeMap order is the lock order.
        let mut grouped: Grouped<K, P> = BTreeMap::new();
        for (pos, w) in writes.into_iter().enumerate() {
            grouped
                .entry(w.identity)
                .or_default()
                .push((pos, w.payload, w.valid_from));
        }

        let keys: Vec<K> = grouped.keys().cloned().collect();
        let result = self.insert_grouped(grouped, total, principal, link);
        if result.is_err() {
            for key in &keys {
                self.discard_if_empty(key);
            }
        }
        result
    }

    fn insert_grouped<F>(
        &self,
        grouped: Grouped<K, P>,
        total: usize,
        principal: &Principal,
        link: F,
    ) -> StoreResult<Vec<VersionedRecord<K, P>>>
    where
        F: Fn(&mut P, Option<&P>),
    {
        let cells: Vec<(EntityRef, Arc<ChainCell<K, P>>)> = grouped
            .keys()
            .map(|k| (self.entity_ref(k), self.cell(k)))
            .collect();
        let mut guards: Vec<MutexGuard<'_, ()>> = Vec::with_capacity(cells.len());
        for (entity, cell) in &cells {
            guards.push(self.lock_writer(cell, entity)?);
        }

        let now = self.ctx.clock.now();
        let mut staged: Vec<Vec<VersionedRecord<K, P>>> = Vec::with_capacity(cells.len());
        let mut entries: Vec<AuditEntry> = Vec::with_capacity(total * 2);
        let mut records: Vec<(usize, VersionedRecord<K, P>)> = Vec::with_capacity(total);

        for ((identity, group), (entity, cell)) in grouped.into_iter().zip(&cells) {
            let mut tail = cell.latest();
            let mut pushed = Vec::with_capacity(group.len());
            for (pos, payload, valid_from) in group {
                let record = self.stage(
                    &mut tail,
                    identity.clone(),
                    payload,
                    valid_from,
                    now,
                    entity,
                    principal,
                    &link,
                    &mut entries,
                )?;
                pushed.push(record.clone());
                records.push((pos, record));
            }
            staged.push(pushed);
        }

        self.ctx.audit.record_all(entries)?;
        for ((_, cell), pushed) in cells.iter().zip(staged) {
            cell.apply(|chain| {
                for record in pushed {
                    chain.push(record, now);
                }
            });
        }
        drop(guards);

        debug!(
            target: "chainstate::storage",
            table = %self.table,
            versions = total,
            identities = cells.len(),
            "Batch inserted"
        );
        records.sort_by_key(|(pos, _)| *pos);
        Ok(records.into_iter().map(|(_, r)| r).collect())
    }

    /// Close the open version of `identity` at `at` without a successor
    ///
    /// Returns the closed version. Fails with `NotFound` when the identity
    /// has no open version and `OutOfOrderWrite` when `at` does not follow
    /// its `valid_from`.
    pub fn retire(
        &self,
        identity: &K,
        at: Timestamp,
        principal: &Principal,
    ) -> StoreResult<VersionedRecord<K, P>> {
        self.ctx.liveness.check()?;
        let entity = self.entity_ref(identity);
        let cell = self
            .cells
            .get(identity)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| StoreError::not_found(entity.clone()))?;
        let _writer = self.lock_writer(&cell, &entity)?;

        let open = cell
            .latest()
            .filter(|v| v.is_open())
            .ok_or_else(|| StoreError::not_found(entity.clone()))?;
        if at <= open.valid_from {
            warn!(
                target: "chainstate::storage",
                table = %self.table,
                identity = %entity.identity,
                at = %at,
                valid_from = %open.valid_from,
                "Retire does not follow open version"
            );
            return Err(StoreError::out_of_order(entity, at, open.valid_from));
        }

        let now = self.ctx.clock.now();
        let closed = open.closed_at(at, now);
        self.ctx.audit.record(AuditEntry::update(
            entity.clone(),
            open.snapshot(),
            closed.snapshot(),
            now,
            principal,
        ))?;
        cell.apply(|chain| {
            chain.close_tail(at, now);
        });

        debug!(
            target: "chainstate::storage",
            table = %self.table,
            identity = %entity.identity,
            valid_to = %at,
            "Version retired"
        );
        Ok(closed)
    }

    /// Rebuild chains from the committed audit entries of this table
    ///
    /// The last snapshot of every record id, in sequence order, is its
    /// committed state, so a version closed after its insert comes back
    /// closed. Meant for a store nothing has been written to yet. Record ids
    /// continue after the highest one restored. Returns the number of
    /// versions restored.
    pub fn restore<'a, I>(&self, entries: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = &'a AuditEntry>,
    {
        let mut ordered: Vec<&AuditEntry> = entries
            .into_iter()
            .filter(|e| e.table == self.table)
            .collect();
        ordered.sort_by_key(|e| e.seq);

        let mut latest: BTreeMap<RecordId, &RowSnapshot> = BTreeMap::new();
        for entry in ordered {
            match (entry.operation, entry.after.as_ref()) {
                (AuditOperation::Insert | AuditOperation::Update, Some(after)) => {
                    latest.insert(after.decode("id")?, after);
                }
                _ => {
                    return Err(StoreError::persistence(format!(
                        "unexpected {} entry for {} at seq {}",
                        entry.operation,
                        entry.entity(),
                        entry.seq
                    )))
                }
            }
        }

        let restored = latest.len();
        let last_id = latest.keys().next_back().copied();
        let mut versions: BTreeMap<K, Vec<VersionedRecord<K, P>>> = BTreeMap::new();
        for row in latest.into_values() {
            let record = VersionedRecord::<K, P>::from_row(row)?;
            versions
                .entry(record.identity.clone())
                .or_default()
                .push(record);
        }

        let mut chains = Vec::with_capacity(versions.len());
        for (identity, list) in versions {
            let chain = VersionChain::from_versions(list).map_err(|reason| {
                StoreError::persistence(format!(
                    "audit trail of {} is inconsistent: {}",
                    self.entity_ref(&identity),
                    reason
                ))
            })?;
            chains.push((identity, chain));
        }

        let identities = chains.len();
        for (identity, chain) in chains {
            self.cells
                .insert(identity, Arc::new(ChainCell::with_chain(chain)));
        }
        if let Some(last) = last_id {
            self.resume_ids_after(last);
        }

        info!(
            target: "chainstate::storage",
            table = %self.table,
            versions = restored,
            identities,
            "Chains restored from audit trail"
        );
        Ok(restored)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The open version of `identity`
    pub fn current(&self, identity: &K) -> Option<VersionedRecord<K, P>> {
        self.read(identity, |chain| chain.open().map(|v| VersionedRecord::clone(v)))
            .flatten()
    }

    /// The version of `identity` authoritative at `at`
    pub fn as_of(&self, identity: &K, at: Timestamp) -> Option<VersionedRecord<K, P>> {
        self.read(identity, |chain| chain.as_of(at).map(|v| VersionedRecord::clone(v)))
            .flatten()
    }

    /// Every version of `identity`, oldest first
    pub fn history(&self, identity: &K) -> Vec<VersionedRecord<K, P>> {
        self.read(identity, |chain| {
            chain
                .history()
                .map(|v| VersionedRecord::clone(v))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
    }

    /// Consistent snapshot of an identity's chain
    ///
    /// While the snapshot is held, the next write to the identity copies the
    /// chain once instead of appending in place.
    pub fn chain(&self, identity: &K) -> Option<Arc<VersionChain<K, P>>> {
        let chain = self.cells.get(identity)?.snapshot();
        if chain.is_empty() {
            None
        } else {
            Some(chain)
        }
    }

    /// Open versions of every identity, ordered by identity
    pub fn current_all(&self) -> Vec<VersionedRecord<K, P>> {
        self.current_where(|_| true)
    }

    /// Open versions of identities matching `filter`, ordered by identity
    pub fn current_where(&self, filter: impl Fn(&K) -> bool) -> Vec<VersionedRecord<K, P>> {
        self.collect(filter, |chain| {
            chain.open().map(|v| VersionedRecord::clone(v)).into_iter().collect()
        })
    }

    /// Versions at `at` of identities matching `filter`, ordered by identity
    pub fn as_of_where(
        &self,
        at: Timestamp,
        filter: impl Fn(&K) -> bool,
    ) -> Vec<VersionedRecord<K, P>> {
        self.collect(filter, |chain| {
            chain.as_of(at).map(|v| VersionedRecord::clone(v)).into_iter().collect()
        })
    }

    /// Versions whose `valid_from` lies in `(start, end]`, ordered by `(valid_from, id)`
    pub fn changed_between(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> Vec<VersionedRecord<K, P>> {
        let mut changed = self.collect(
            |_| true,
            |chain| {
                chain
                    .changed_between(start, end)
                    .map(|v| VersionedRecord::clone(v))
                    .collect()
            },
        );
        changed.sort_by_key(|v| (v.valid_from, v.id));
        changed
    }

    /// Identities with at least one version, sorted
    pub fn identities(&self) -> Vec<K> {
        let mut keys: Vec<K> = self
            .cells
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of identities with at least one version
    pub fn len(&self) -> usize {
        self.identities().len()
    }

    /// Whether no identity has a version
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of versions across identities
    pub fn version_count(&self) -> usize {
        self.cells
            .iter()
            .map(|e| e.value().published.read().len())
            .sum()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn cell(&self, identity: &K) -> Arc<ChainCell<K, P>> {
        if let Some(cell) = self.cells.get(identity) {
            return Arc::clone(cell.value());
        }
        let entry = self
            .cells
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(ChainCell::new()));
        Arc::clone(entry.value())
    }

    /// Drop the cell of an identity that has no version and no other holder
    fn discard_if_empty(&self, identity: &K) {
        self.cells
            .remove_if(identity, |_, cell| Arc::strong_count(cell) == 1 && cell.is_empty());
    }

    fn read<R>(&self, identity: &K, f: impl FnOnce(&VersionChain<K, P>) -> R) -> Option<R> {
        let cell = self.cells.get(identity)?;
        let chain = cell.published.read();
        Some(f(&chain))
    }

    fn lock_writer<'a>(
        &self,
        cell: &'a ChainCell<K, P>,
        entity: &EntityRef,
    ) -> StoreResult<MutexGuard<'a, ()>> {
        cell.writer.try_lock_for(self.ctx.lock_timeout).ok_or_else(|| {
            warn!(
                target: "chainstate::storage",
                entity = %entity,
                timeout_ms = self.ctx.lock_timeout.as_millis() as u64,
                "Writer lock timed out"
            );
            StoreError::identity_conflict(entity.clone())
        })
    }

    fn admit(
        &self,
        tail: Option<&VersionedRecord<K, P>>,
        entity: &EntityRef,
        valid_from: Timestamp,
    ) -> StoreResult<()> {
        chain::admits(tail, valid_from).map_err(|latest| {
            warn!(
                target: "chainstate::storage",
                entity = %entity,
                valid_from = %valid_from,
                latest = %latest,
                "Out-of-order write rejected"
            );
            StoreError::out_of_order(entity.clone(), valid_from, latest)
        })
    }

    fn new_record(
        &self,
        identity: K,
        payload: P,
        valid_from: Timestamp,
        now: Timestamp,
    ) -> VersionedRecord<K, P> {
        let mut record = VersionedRecord {
            id: RecordId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            identity,
            payload,
            valid_from,
            valid_to: None,
            inserted_at: now,
            modified_at: now,
        };
        self.ctx.clock.stamp_new_at(&mut record, now);
        record
    }

    /// Validate one write against `tail`, queue its audit entries and advance `tail`
    #[allow(clippy::too_many_arguments)]
    fn stage<F, E>(
        &self,
        tail: &mut Option<Arc<VersionedRecord<K, P>>>,
        identity: K,
        mut payload: P,
        valid_from: Timestamp,
        now: Timestamp,
        entity: &EntityRef,
        principal: &Principal,
        link: F,
        entries: &mut E,
    ) -> StoreResult<VersionedRecord<K, P>>
    where
        F: FnOnce(&mut P, Option<&P>),
        E: Extend<AuditEntry>,
    {
        self.admit(tail.as_deref(), entity, valid_from)?;
        let open = tail.as_deref().filter(|v| v.is_open());
        link(&mut payload, open.map(|v| &v.payload));
        if let Some(open) = open {
            let closed = open.closed_at(valid_from, now);
            entries.extend(Some(AuditEntry::update(
                entity.clone(),
                open.snapshot(),
                closed.snapshot(),
                now,
                principal,
            )));
        }

        let record = self.new_record(identity, payload, valid_from, now);
        entries.extend(Some(AuditEntry::insert(
            entity.clone(),
            record.snapshot(),
            now,
            principal,
        )));
        *tail = Some(Arc::new(record.clone()));
        Ok(record)
    }

    fn collect<F, G>(&self, filter: F, pick: G) -> Vec<VersionedRecord<K, P>>
    where
        F: Fn(&K) -> bool,
        G: Fn(&VersionChain<K, P>) -> Vec<VersionedRecord<K, P>>,
    {
        let mut picked: Vec<(K, Vec<VersionedRecord<K, P>>)> = self
            .cells
            .iter()
            .filter(|e| filter(e.key()))
            .map(|e| (e.key().clone(), pick(&e.value().published.read())))
            .collect();
        picked.sort_by(|a, b| a.0.cmp(&b.0));
        picked.into_iter().flat_map(|(_, versions)| versions).collect()
    }
}

impl<K: IdentityKey, P: Payload> std::fmt::Debug for VersionedStore<K, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("table", &self.table)
            .field("identities", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation_clock::MutationClock;
    use chainstate_core::{Bytes, ContractId, ManualClock};
    use chainstate_durability::{AuditScope, FaultySink, TimeRange};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Balance(u64);

    impl Payload for Balance {
        fn write_fields(&self, row: &mut RowSnapshot) {
            row.set("balance", self.0);
        }

        fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
            row.decode("balance").map(Balance)
        }
    }

    fn ts(us: u64) -> Timestamp {
        Timestamp::from_micros(us)
    }

    fn c1() -> ContractId {
        ContractId::new(Bytes::from([0xc1u8]))
    }

    fn indexer() -> Principal {
        Principal::new("indexer")
    }

    fn store() -> VersionedStore<ContractId, Balance> {
        VersionedStore::new(Table::ContractBalance, StoreContext::in_memory())
    }

    #[test]
    fn test_insert_then_current() {
        let s = store();
        let r = s.insert(c1(), Balance(100), ts(100), &indexer()).unwrap();
        assert_eq!(r.id, RecordId(1));
        assert!(r.is_open());
        assert_eq!(s.current(&c1()).unwrap().payload, Balance(100));
        assert_eq!(s.audit().len(), 1);
    }

    #[test]
    fn test_supersession_closes_previous() {
        let s = store();
        s.insert(c1(), Balance(100), ts(100), &indexer()).unwrap();
        s.insert(c1(), Balance(200), ts(200), &indexer()).unwrap();

        let history = s.history(&c1());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].valid_to, Some(ts(200)));
        assert_eq!(history[1].valid_to, None);
        assert_eq!(s.as_of(&c1(), ts(150)).unwrap().payload, Balance(100));
        assert_eq!(s.as_of(&c1(), ts(250)).unwrap().payload, Balance(200));
        assert!(s.as_of(&c1(), ts(50)).is_none());

        let ops: Vec<AuditOperation> = s
            .audit()
            .query(&AuditScope::Table(Table::ContractBalance), TimeRange::all())
            .map(|e| e.operation)
            .collect();
        assert_eq!(
            ops,
            vec![AuditOperation::Insert, AuditOperation::Update, AuditOperation::Insert]
        );
    }

    #[test]
    fn test_out_of_order_leaves_state_unchanged() {
        let s = store();
        s.insert(c1(), Balance(100), ts(100), &indexer()).unwrap();
        s.insert(c1(), Balance(200), ts(200), &indexer()).unwrap();
        let audit_before = s.audit().len();

        let err = s.insert(c1(), Balance(150), ts(150), &indexer()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::OutOfOrderWrite { latest, .. } if latest == ts(200)
        ));
        let equal = s.insert(c1(), Balance(201), ts(200), &indexer()).unwrap_err();
        assert!(matches!(equal, StoreError::OutOfOrderWrite { .. }));

        assert_eq!(s.history(&c1()).len(), 2);
        assert_eq!(s.current(&c1()).unwrap().payload, Balance(200));
        assert_eq!(s.audit().len(), audit_before);
    }

    #[test]
    fn test_audit_failure_aborts_write() {
        let sink = FaultySink::new();
        let faults = sink.handle();
        let ctx = StoreContext::new(Arc::new(AuditLog::new(Box::new(sink))));
        let s: VersionedStore<ContractId, Balance> =
            VersionedStore::new(Table::ContractBalance, ctx);

        s.insert(c1(), Balance(100), ts(100), &indexer()).unwrap();
        faults.fail_next_appends(1);
        let err = s.insert(c1(), Balance(200), ts(200), &indexer()).unwrap_err();
        assert!(matches!(err, StoreError::AuditWrite { .. }));

        let current = s.current(&c1()).unwrap();
        assert_eq!(current.payload, Balance(100));
        assert!(current.is_open());
        assert_eq!(s.history(&c1()).len(), 1);

        // Retried write succeeds once the sink recovers
        s.insert(c1(), Balance(200), ts(200), &indexer()).unwrap();
        assert_eq!(s.history(&c1()).len(), 2);
    }

    #[test]
    fn test_bookkeeping_from_clock() {
        let manual = Arc::new(ManualClock::new(ts(5_000)));
        let ctx = StoreContext::in_memory().with_clock(MutationClock::new(manual.clone()));
        let s: VersionedStore<ContractId, Balance> =
            VersionedStore::new(Table::ContractBalance, ctx);

        s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        manual.advance(Duration::from_micros(10));
        s.insert(c1(), Balance(2), ts(200), &indexer()).unwrap();

        let history = s.history(&c1());
        assert_eq!(history[0].inserted_at, ts(5_000));
        assert_eq!(history[0].modified_at, ts(5_010));
        assert_eq!(history[1].inserted_at, ts(5_010));

        let entries: Vec<_> = s.audit().for_entity(&s.entity_ref(&c1())).collect();
        assert!(entries[1..].iter().all(|e| e.timestamp == ts(5_010)));
    }

    #[test]
    fn test_insert_linked_sees_open_payload() {
        let s = store();
        s.insert(c1(), Balance(100), ts(100), &indexer()).unwrap();
        let mut seen = None;
        s.insert_linked(c1(), Balance(300), ts(200), &indexer(), |_, prev| {
            seen = prev.cloned();
        })
        .unwrap();
        assert_eq!(seen, Some(Balance(100)));
    }

    #[test]
    fn test_retire() {
        let s = store();
        assert!(matches!(
            s.retire(&c1(), ts(100), &indexer()),
            Err(StoreError::NotFound { .. })
        ));
        s.insert(c1(), Balance(100), ts(100), &indexer()).unwrap();
        assert!(matches!(
            s.retire(&c1(), ts(100), &indexer()),
            Err(StoreError::OutOfOrderWrite { .. })
        ));

        let closed = s.retire(&c1(), ts(150), &indexer()).unwrap();
        assert_eq!(closed.valid_to, Some(ts(150)));
        assert!(s.current(&c1()).is_none());
        assert!(s.as_of(&c1(), ts(160)).is_none());
        assert_eq!(s.as_of(&c1(), ts(149)).unwrap().payload, Balance(100));
        assert!(matches!(
            s.retire(&c1(), ts(300), &indexer()),
            Err(StoreError::NotFound { .. })
        ));

        // A later version may start where the retired one ended
        assert!(s.insert(c1(), Balance(1), ts(149), &indexer()).is_err());
        s.insert(c1(), Balance(1), ts(150), &indexer()).unwrap();
        assert_eq!(s.audit().len(), 3);
    }

    #[test]
    fn test_batch_is_atomic() {
        let s = store();
        let c2 = ContractId::new(Bytes::from([0xc2u8]));
        s.insert(c2.clone(), Balance(1), ts(500), &indexer()).unwrap();

        let err = s
            .insert_batch(
                vec![
                    PendingVersion::new(c1(), Balance(100), ts(100)),
                    PendingVersion::new(c2.clone(), Balance(2), ts(400)),
                ],
                &indexer(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrderWrite { .. }));
        assert!(s.current(&c1()).is_none());
        assert_eq!(s.current(&c2).unwrap().payload, Balance(1));
        assert_eq!(s.audit().len(), 1);
    }

    #[test]
    fn test_batch_same_identity_in_order() {
        let s = store();
        let records = s
            .insert_batch(
                vec![
                    PendingVersion::new(c1(), Balance(1), ts(100)),
                    PendingVersion::new(c1(), Balance(2), ts(200)),
                    PendingVersion::new(c1(), Balance(3), ts(300)),
                ],
                &indexer(),
            )
            .unwrap();
        assert_eq!(
            records.iter().map(|r| r.payload.0).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let history = s.history(&c1());
        assert_eq!(history.len(), 3);
        assert!(s.chain(&c1()).unwrap().check_invariants().is_ok());
        // 3 inserts + 2 closes
        assert_eq!(s.audit().len(), 5);
    }

    #[test]
    fn test_changed_between_and_current_all() {
        let s = store();
        let c2 = ContractId::new(Bytes::from([0xc2u8]));
        s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        s.insert(c2.clone(), Balance(2), ts(150), &indexer()).unwrap();
        s.insert(c1(), Balance(3), ts(200), &indexer()).unwrap();

        assert_eq!(s.current_all().len(), 2);
        assert_eq!(s.identities(), vec![c1(), c2]);
        let changed = s.changed_between(ts(100), ts(200));
        assert_eq!(
            changed.iter().map(|r| r.payload.0).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(s.changed_between(ts(150), ts(150)).is_empty());
        assert_eq!(s.version_count(), 3);
    }

    #[test]
    fn test_shutdown_rejects_writes() {
        let s = store();
        s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        s.ctx.liveness.shut_down();
        assert!(matches!(
            s.insert(c1(), Balance(2), ts(200), &indexer()),
            Err(StoreError::Persistence { .. })
        ));
        assert_eq!(s.current(&c1()).unwrap().payload, Balance(1));
    }

    #[test]
    fn test_resume_ids_after() {
        let s = store();
        s.resume_ids_after(RecordId(41));
        let r = s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        assert_eq!(r.id, RecordId(42));
        s.resume_ids_after(RecordId(3));
        let r = s.insert(c1(), Balance(2), ts(200), &indexer()).unwrap();
        assert_eq!(r.id, RecordId(43));
    }

    #[test]
    fn test_held_writer_reports_conflict() {
        let ctx = StoreContext::in_memory().with_lock_timeout(Duration::from_millis(10));
        let s: VersionedStore<ContractId, Balance> =
            VersionedStore::new(Table::ContractBalance, ctx);
        let cell = s.cell(&c1());
        let _held = cell.writer.lock();
        let err = s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap_err();
        assert!(matches!(err, StoreError::IdentityConflict { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failed_first_write_leaves_no_identity() {
        let sink = FaultySink::new();
        let faults = sink.handle();
        let ctx = StoreContext::new(Arc::new(AuditLog::new(Box::new(sink))));
        let s: VersionedStore<ContractId, Balance> =
            VersionedStore::new(Table::ContractBalance, ctx);

        faults.fail_next_appends(1);
        assert!(s.insert(c1(), Balance(1), ts(100), &indexer()).is_err());
        assert!(s.cells.is_empty());

        let c2 = ContractId::new(Bytes::from([0xc2u8]));
        let err = s
            .insert_batch(
                vec![
                    PendingVersion::new(c2.clone(), Balance(1), ts(200)),
                    PendingVersion::new(c2.clone(), Balance(2), ts(100)),
                ],
                &indexer(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrderWrite { .. }));
        assert!(s.cells.is_empty());
        assert!(s.identities().is_empty());
        assert_eq!(s.audit().len(), 0);
    }

    #[test]
    fn test_failed_write_keeps_existing_identity() {
        let s = store();
        s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        assert!(s.insert(c1(), Balance(2), ts(50), &indexer()).is_err());
        assert_eq!(s.cells.len(), 1);
        assert_eq!(s.current(&c1()).unwrap().payload, Balance(1));
    }

    #[test]
    fn test_appends_in_place_without_snapshots() {
        let s = store();
        s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        let before = Arc::as_ptr(&*s.cells.get(&c1()).unwrap().published.read());
        for i in 2..50u64 {
            s.insert(c1(), Balance(i), ts(i * 100), &indexer()).unwrap();
        }
        let after = Arc::as_ptr(&*s.cells.get(&c1()).unwrap().published.read());
        assert_eq!(before, after);
        assert_eq!(s.history(&c1()).len(), 49);
    }

    #[test]
    fn test_held_chain_snapshot_is_unaffected_by_writes() {
        let s = store();
        s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        let held = s.chain(&c1()).unwrap();

        s.insert(c1(), Balance(2), ts(200), &indexer()).unwrap();
        s.retire(&c1(), ts(300), &indexer()).unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(held.open().unwrap().payload, Balance(1));
        let now = s.chain(&c1()).unwrap();
        assert_eq!(now.len(), 2);
        assert!(now.open().is_none());
    }

    #[test]
    fn test_restore_rebuilds_chains_from_audit() {
        let s = store();
        let c2 = ContractId::new(Bytes::from([0xc2u8]));
        s.insert(c1(), Balance(1), ts(100), &indexer()).unwrap();
        s.insert(c2.clone(), Balance(7), ts(120), &indexer()).unwrap();
        s.insert(c1(), Balance(2), ts(200), &indexer()).unwrap();
        s.retire(&c2, ts(150), &indexer()).unwrap();
        let entries: Vec<AuditEntry> = s
            .audit()
            .query(&AuditScope::All, TimeRange::all())
            .collect();

        let restored = store();
        assert_eq!(restored.restore(&entries).unwrap(), 3);
        assert_eq!(restored.history(&c1()), s.history(&c1()));
        assert_eq!(restored.history(&c2), s.history(&c2));
        assert_eq!(restored.current(&c1()).unwrap().payload, Balance(2));
        assert!(restored.current(&c2).is_none());

        let err = restored
            .insert(c1(), Balance(3), ts(150), &indexer())
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrderWrite { .. }));
        let next = restored.insert(c1(), Balance(3), ts(300), &indexer()).unwrap();
        assert_eq!(next.id, RecordId(4));
    }

    #[test]
    fn test_restore_rejects_inconsistent_trail() {
        let s = store();
        let open = |id: u64, from: u64| VersionedRecord {
            id: RecordId(id),
            identity: c1(),
            payload: Balance(id),
            valid_from: ts(from),
            valid_to: None,
            inserted_at: ts(from),
            modified_at: ts(from),
        };
        let entries: Vec<AuditEntry> = [open(1, 100), open(2, 200)]
            .iter()
            .map(|r| AuditEntry::insert(s.entity_ref(&c1()), r.snapshot(), ts(1), &indexer()))
            .collect();

        let err = s.restore(&entries).unwrap_err();
        assert!(matches!(err, StoreError::Persistence { .. }));
        assert!(s.is_empty());
    }
}
