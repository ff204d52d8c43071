//! Versioned record type
//!
//! A `VersionedRecord<K, P>` is one version of the fact identified by `K`.
//! Versions of one identity form a chain of half-open validity intervals
//! `[valid_from, valid_to)`; the version with `valid_to = None` is the open
//! (currently authoritative) one.
//!
//! ## Invariants
//!
//! - `id` is assigned by the store and never changes
//! - once `valid_to` is set, `payload`, `valid_from` and `valid_to` never change;
//!   only `modified_at` is bookkeeping
//! - `valid_to`, when set, is strictly greater than `valid_from`

use crate::error::StoreResult;
use crate::snapshot::{IdentityKey, Payload, RowSnapshot};
use crate::timestamp::Timestamp;
use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One version of a tracked fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord<K, P> {
    /// Store-assigned identifier
    pub id: RecordId,
    /// Identity shared by the chain
    pub identity: K,
    /// Fact content
    pub payload: P,
    /// Instant this version becomes authoritative
    pub valid_from: Timestamp,
    /// Instant this version stopped being authoritative; `None` while open
    pub valid_to: Option<Timestamp>,
    /// Bookkeeping: when the row was stored
    pub inserted_at: Timestamp,
    /// Bookkeeping: when the row was last touched
    pub modified_at: Timestamp,
}

impl<K, P> VersionedRecord<K, P> {
    /// Whether this is the open version of its chain
    #[inline]
    pub fn is_open(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Whether `at` falls inside `[valid_from, valid_to)`; an open end is +∞
    pub fn contains(&self, at: Timestamp) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |end| at < end)
    }

    /// Whether two versions' intervals intersect
    pub fn overlaps(&self, other: &VersionedRecord<K, P>) -> bool {
        let self_end = self.valid_to.unwrap_or(Timestamp::MAX);
        let other_end = other.valid_to.unwrap_or(Timestamp::MAX);
        self.valid_from < other_end && other.valid_from < self_end
    }

    /// Copy of this version closed at `at`, touched at `now`
    ///
    /// The caller guarantees the version is open and `at > valid_from`.
    pub fn closed_at(&self, at: Timestamp, now: Timestamp) -> Self
    where
        K: Clone,
        P: Clone,
    {
        debug_assert!(self.is_open(), "closing an already closed version");
        debug_assert!(at > self.valid_from, "zero-length interval");
        VersionedRecord {
            id: self.id,
            identity: self.identity.clone(),
            payload: self.payload.clone(),
            valid_from: self.valid_from,
            valid_to: Some(at),
            inserted_at: self.inserted_at,
            modified_at: now,
        }
    }
}

impl<K: IdentityKey, P: Payload> VersionedRecord<K, P> {
    /// Structural snapshot of the full row
    pub fn snapshot(&self) -> RowSnapshot {
        let mut row = RowSnapshot::new();
        row.set("id", self.id);
        self.identity.write_fields(&mut row);
        self.payload.write_fields(&mut row);
        row.set("valid_from", self.valid_from)
            .set("valid_to", self.valid_to.map_or(Value::Null, Value::from))
            .set("inserted_at", self.inserted_at)
            .set("modified_at", self.modified_at);
        row
    }

    /// Rebuild a version from a snapshot produced by [`VersionedRecord::snapshot`]
    pub fn from_row(row: &RowSnapshot) -> StoreResult<Self> {
        Ok(VersionedRecord {
            id: row.decode("id")?,
            identity: K::from_row(row)?,
            payload: P::from_row(row)?,
            valid_from: row.decode("valid_from")?,
            valid_to: row.decode("valid_to")?,
            inserted_at: row.decode("inserted_at")?,
            modified_at: row.decode("modified_at")?,
        })
    }
}
