//! Bookkeeping timestamps
//!
//! Rows carry `inserted_at` (set once) and `modified_at` (set on every
//! change). `MutationClock` stamps both from a single [`Clock`] so one unit of
//! work uses one instant for the new row, the row it closes and its audit
//! entries.

use chainstate_core::{Clock, SystemClock, Timestamp, VersionedRecord};
use std::sync::Arc;

/// Rows with bookkeeping columns
pub trait Bookkeeping {
    /// Set `inserted_at`
    fn set_inserted_at(&mut self, ts: Timestamp);
    /// Set `modified_at`
    fn set_modified_at(&mut self, ts: Timestamp);
}

impl<K, P> Bookkeeping for VersionedRecord<K, P> {
    fn set_inserted_at(&mut self, ts: Timestamp) {
        self.inserted_at = ts;
    }

    fn set_modified_at(&mut self, ts: Timestamp) {
        self.modified_at = ts;
    }
}

/// Stamps `inserted_at` / `modified_at`
#[derive(Clone)]
pub struct MutationClock {
    clock: Arc<dyn Clock>,
}

impl MutationClock {
    /// Stamp from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MutationClock { clock }
    }

    /// Stamp from wall time
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Current bookkeeping instant
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Initialize both columns of a newly created row at `now`
    pub fn stamp_new_at<R: Bookkeeping>(&self, row: &mut R, now: Timestamp) {
        row.set_inserted_at(now);
        row.set_modified_at(now);
    }

    /// Initialize both columns of a newly created row
    pub fn stamp_new<R: Bookkeeping>(&self, row: &mut R) -> Timestamp {
        let now = self.now();
        self.stamp_new_at(row, now);
        now
    }

    /// Refresh `modified_at`; `inserted_at` is left alone
    pub fn touch<R: Bookkeeping>(&self, row: &mut R) -> Timestamp {
        let now = self.now();
        row.set_modified_at(now);
        now
    }
}

impl std::fmt::Debug for MutationClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationClock")
            .field("now", &self.now())
            .finish()
    }
}
