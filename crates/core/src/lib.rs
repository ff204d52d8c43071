//! Core types for chainstate
//!
//! This crate defines the foundational types used throughout the system:
//! - Timestamp: microsecond business and bookkeeping time
//! - Identifiers: ContractId, ComponentId, Slot, Principal, RecordId, Chain
//! - Table / EntityRef: addressing of tracked rows
//! - VersionedRecord: one version of a tracked fact
//! - RowSnapshot, IdentityKey, Payload: explicit row snapshots for auditing
//! - Clock: bookkeeping time sources
//! - StoreError: error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod entity;
pub mod error;
pub mod record;
pub mod snapshot;
pub mod timestamp;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{EntityRef, Table};
pub use error::{StoreError, StoreResult};
pub use record::VersionedRecord;
pub use snapshot::{IdentityKey, Payload, RowSnapshot};
pub use timestamp::Timestamp;
pub use types::{Bytes, Chain, ComponentId, ContractId, Principal, RecordId, Slot};
