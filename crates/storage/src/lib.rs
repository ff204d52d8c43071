//! Temporal storage for chainstate
//!
//! This crate implements the versioned storage layer:
//! - VersionChain: ordered, immutable-once-published versions of one identity
//! - VersionedStore: supersession, point-in-time reads and audit capture
//! - MetadataTable: audited mutable rows
//! - MutationClock: `inserted_at` / `modified_at` bookkeeping
//! - StoreContext: audit log, clock, lock timeout and shutdown flag shared by tables

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod context;
pub mod metadata;
pub mod mutation_clock;
pub mod store;

pub use chain::{Superseded, VersionChain};
pub use context::{Liveness, StoreContext, DEFAULT_LOCK_TIMEOUT};
pub use metadata::{MetadataRow, MetadataTable};
pub use mutation_clock::{Bookkeeping, MutationClock};
pub use store::{PendingVersion, VersionedStore};
