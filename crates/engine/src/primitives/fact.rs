//! Generic entity catalog
//!
//! A [`VersionedFact`] names the identity a fact versions, the payload it
//! carries and the table it lives in. [`Catalog`] turns any such fact type
//! into a temporal table backed by a [`VersionedStore`], so the five tracked
//! entity kinds share one supersession and audit path.

use chainstate_core::{IdentityKey, Payload, Principal, StoreResult, Table, Timestamp};
use chainstate_durability::AuditEntry;
use chainstate_storage::{PendingVersion, StoreContext, VersionChain, VersionedStore};
use std::sync::Arc;

/// A fact tracked as a chain of versions
pub trait VersionedFact: Sized + Send + Sync + 'static {
    /// What a chain of versions shares
    type Identity: IdentityKey;
    /// What each version carries
    type Payload: Payload;
    /// Table the fact lives in
    const TABLE: Table;

    /// Identity of this fact
    fn identity(&self) -> Self::Identity;

    /// Split off the payload
    fn into_payload(self) -> Self::Payload;

    /// Fill fields derived from the version being superseded
    ///
    /// Runs inside the same unit of work as the supersession. The default
    /// does nothing.
    fn link_previous(_payload: &mut Self::Payload, _previous: Option<&Self::Payload>) {}
}

/// Stored version of a fact
pub type Version<F> =
    chainstate_core::VersionedRecord<<F as VersionedFact>::Identity, <F as VersionedFact>::Payload>;

/// Temporal table for one fact type
pub struct Catalog<F: VersionedFact> {
    store: VersionedStore<F::Identity, F::Payload>,
}

impl<F: VersionedFact> Catalog<F> {
    /// Empty catalog writing through `ctx`
    pub fn new(ctx: StoreContext) -> Self {
        Catalog {
            store: VersionedStore::new(F::TABLE, ctx),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &VersionedStore<F::Identity, F::Payload> {
        &self.store
    }

    /// Table this catalog tracks
    pub fn table(&self) -> Table {
        F::TABLE
    }

    // ========== Writes ==========

    /// Record `fact` as authoritative from `valid_from` on
    pub fn record(
        &self,
        fact: F,
        valid_from: Timestamp,
        principal: &Principal,
    ) -> StoreResult<Version<F>> {
        let identity = fact.identity();
        self.insert(identity, fact.into_payload(), valid_from, principal)
    }

    /// Insert a version for `identity`, superseding its open version
    pub fn insert(
        &self,
        identity: F::Identity,
        payload: F::Payload,
        valid_from: Timestamp,
        principal: &Principal,
    ) -> StoreResult<Version<F>> {
        self.store
            .insert_linked(identity, payload, valid_from, principal, F::link_previous)
    }

    /// Record several facts atomically
    ///
    /// Facts for the same identity must be in `valid_from` order.
    pub fn record_batch(
        &self,
        facts: Vec<(F, Timestamp)>,
        principal: &Principal,
    ) -> StoreResult<Vec<Version<F>>> {
        let writes = facts
            .into_iter()
            .map(|(fact, valid_from)| {
                PendingVersion::new(fact.identity(), fact.into_payload(), valid_from)
            })
            .collect();
        self.insert_batch(writes, principal)
    }

    /// Insert several versions atomically
    pub fn insert_batch(
        &self,
        writes: Vec<PendingVersion<F::Identity, F::Payload>>,
        principal: &Principal,
    ) -> StoreResult<Vec<Version<F>>> {
        self.store
            .insert_batch_linked(writes, principal, F::link_previous)
    }

    /// Close the open version of `identity` at `at` without a successor
    pub fn retire(
        &self,
        identity: &F::Identity,
        at: Timestamp,
        principal: &Principal,
    ) -> StoreResult<Version<F>> {
        self.store.retire(identity, at, principal)
    }

    // ========== Reads ==========

    /// Open version of `identity`
    pub fn current(&self, identity: &F::Identity) -> Option<Version<F>> {
        self.store.current(identity)
    }

    /// Version of `identity` valid at `at`
    pub fn as_of(&self, identity: &F::Identity, at: Timestamp) -> Option<Version<F>> {
        self.store.as_of(identity, at)
    }

    /// All versions of `identity`, oldest first
    pub fn history(&self, identity: &F::Identity) -> Vec<Version<F>> {
        self.store.history(identity)
    }

    /// Consistent snapshot of one identity's chain
    pub fn chain(&self, identity: &F::Identity) -> Option<Arc<VersionChain<F::Identity, F::Payload>>> {
        self.store.chain(identity)
    }

    /// Every open version
    pub fn current_all(&self) -> Vec<Version<F>> {
        self.store.current_all()
    }

    /// Versions starting in `(start, end]`
    pub fn changed_between(&self, start: Timestamp, end: Timestamp) -> Vec<Version<F>> {
        self.store.changed_between(start, end)
    }

    /// Rebuild this catalog's chains from committed audit entries
    ///
    /// Entries of other tables are skipped. Returns the number of versions
    /// restored.
    pub fn restore<'a, I>(&self, entries: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = &'a AuditEntry>,
    {
        self.store.restore(entries)
    }
}
