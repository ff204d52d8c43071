//! Mutable metadata rows
//!
//! Some rows are not facts with a validity interval but mutable state
//! (ingestion cursors). `MetadataTable` keeps the latest value per key,
//! stamps bookkeeping columns through [`MutationClock`](crate::MutationClock)
//! and records every create, change and removal in the audit log.

use crate::context::StoreContext;
use crate::mutation_clock::Bookkeeping;
use chainstate_core::{
    EntityRef, IdentityKey, Payload, Principal, RowSnapshot, StoreError, StoreResult, Table,
    Timestamp,
};
use chainstate_durability::{AuditEntry, AuditOperation};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

/// Stored metadata row
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow<K, V> {
    /// Row key
    pub key: K,
    /// Row content
    pub value: V,
    /// When the row was created
    pub inserted_at: Timestamp,
    /// When the row was last changed
    pub modified_at: Timestamp,
}

impl<K: IdentityKey, V: Payload> MetadataRow<K, V> {
    /// Structural snapshot of the row
    pub fn snapshot(&self) -> RowSnapshot {
        let mut row = RowSnapshot::new();
        self.key.write_fields(&mut row);
        self.value.write_fields(&mut row);
        row.set("inserted_at", self.inserted_at)
            .set("modified_at", self.modified_at);
        row
    }

    /// Rebuild a row from a snapshot produced by [`MetadataRow::snapshot`]
    pub fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(MetadataRow {
            key: K::from_row(row)?,
            value: V::from_row(row)?,
            inserted_at: row.decode("inserted_at")?,
            modified_at: row.decode("modified_at")?,
        })
    }
}

impl<K, V> Bookkeeping for MetadataRow<K, V> {
    fn set_inserted_at(&mut self, ts: Timestamp) {
        self.inserted_at = ts;
    }

    fn set_modified_at(&mut self, ts: Timestamp) {
        self.modified_at = ts;
    }
}

/// Audited key → latest-value table
pub struct MetadataTable<K: IdentityKey, V: Payload> {
    table: Table,
    rows: DashMap<K, MetadataRow<K, V>>,
    ctx: StoreContext,
}

impl<K: IdentityKey, V: Payload> MetadataTable<K, V> {
    /// Empty table
    pub fn new(table: Table, ctx: StoreContext) -> Self {
        MetadataTable {
            table,
            rows: DashMap::new(),
            ctx,
        }
    }

    fn entity_ref(&self, key: &K) -> EntityRef {
        EntityRef::new(self.table, key.key_string())
    }

    /// Create or replace the row for `key`
    pub fn save(&self, key: K, value: V, principal: &Principal) -> StoreResult<MetadataRow<K, V>> {
        self.ctx.liveness.check()?;
        let entity = self.entity_ref(&key);
        let clock = &self.ctx.clock;

        // Shard lock held across the audit append.
        match self.rows.entry(key) {
            Entry::Occupied(mut occupied) => {
                let before = occupied.get().snapshot();
                let mut row = occupied.get().clone();
                row.value = value;
                let now = clock.touch(&mut row);
                self.ctx
                    .audit
                    .record(AuditEntry::update(entity, before, row.snapshot(), now, principal))?;
                occupied.insert(row.clone());
                debug!(target: "chainstate::storage", table = %self.table, "Metadata updated");
                Ok(row)
            }
            Entry::Vacant(vacant) => {
                let mut row = MetadataRow {
                    key: vacant.key().clone(),
                    value,
                    inserted_at: Timestamp::EPOCH,
                    modified_at: Timestamp::EPOCH,
                };
                let now = clock.stamp_new(&mut row);
                self.ctx
                    .audit
                    .record(AuditEntry::insert(entity, row.snapshot(), now, principal))?;
                vacant.insert(row.clone());
                debug!(target: "chainstate::storage", table = %self.table, "Metadata created");
                Ok(row)
            }
        }
    }

    /// Modify the existing row for `key` in place
    pub fn update<F>(&self, key: &K, change: F, principal: &Principal) -> StoreResult<MetadataRow<K, V>>
    where
        F: FnOnce(&mut V),
    {
        self.ctx.liveness.check()?;
        let entity = self.entity_ref(key);
        let mut slot = self
            .rows
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(entity.clone()))?;
        let before = slot.snapshot();
        let mut row = slot.clone();
        change(&mut row.value);
        let now = self.ctx.clock.touch(&mut row);
        self.ctx
            .audit
            .record(AuditEntry::update(entity, before, row.snapshot(), now, principal))?;
        *slot = row.clone();
        Ok(row)
    }

    /// Remove the row for `key`, returning it
    pub fn delete(&self, key: &K, principal: &Principal) -> StoreResult<MetadataRow<K, V>> {
        self.ctx.liveness.check()?;
        let entity = self.entity_ref(key);
        match self.rows.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let now = self.ctx.clock.now();
                self.ctx.audit.record(AuditEntry::delete(
                    entity,
                    occupied.get().snapshot(),
                    now,
                    principal,
                ))?;
                debug!(target: "chainstate::storage", table = %self.table, "Metadata deleted");
                Ok(occupied.remove())
            }
            Entry::Vacant(_) => Err(StoreError::not_found(entity)),
        }
    }

    /// Replay committed audit entries of this table into the rows
    ///
    /// Entries are applied in sequence order; a delete removes the row.
    /// Returns the number of rows present afterwards.
    pub fn restore<'a, I>(&self, entries: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = &'a AuditEntry>,
    {
        let mut ordered: Vec<&AuditEntry> = entries
            .into_iter()
            .filter(|e| e.table == self.table)
            .collect();
        ordered.sort_by_key(|e| e.seq);

        for entry in ordered {
            match (entry.operation, &entry.before, &entry.after) {
                (AuditOperation::Insert | AuditOperation::Update, _, Some(after)) => {
                    let row = MetadataRow::<K, V>::from_row(after)?;
                    self.rows.insert(row.key.clone(), row);
                }
                (AuditOperation::Delete, Some(before), None) => {
                    self.rows.remove(&K::from_row(before)?);
                }
                _ => {
                    return Err(StoreError::persistence(format!(
                        "malformed {} entry for {} at seq {}",
                        entry.operation,
                        entry.entity(),
                        entry.seq
                    )))
                }
            }
        }

        info!(
            target: "chainstate::storage",
            table = %self.table,
            rows = self.rows.len(),
            "Metadata restored from audit trail"
        );
        Ok(self.rows.len())
    }

    /// Row for `key`
    pub fn get(&self, key: &K) -> Option<MetadataRow<K, V>> {
        self.rows.get(key).map(|r| r.value().clone())
    }

    /// All rows ordered by key
    pub fn list(&self) -> Vec<MetadataRow<K, V>> {
        let mut rows: Vec<MetadataRow<K, V>> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
