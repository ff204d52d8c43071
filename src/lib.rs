//! Chainstate - temporal versioning and audit capture for on-chain entity state
//!
//! Chainstate records the time-varying state of protocol components and the
//! contracts behind them as chains of immutable, non-overlapping versions,
//! and logs a before/after snapshot of every mutation.
//!
//! # Quick Start
//!
//! ```ignore
//! use chainstate::{Balance, ContractBalance, ContractId, Database, Principal, Timestamp};
//!
//! let db = Database::ephemeral();
//! let indexer = Principal::new("indexer");
//! let c1 = ContractId::new([0xc1u8]);
//!
//! db.contract_balance().record(
//!     ContractBalance::new(c1.clone(), Balance::from_u128(5)),
//!     Timestamp::from_micros(100),
//!     &indexer,
//! )?;
//! let current = db.contract_balance().current(&c1);
//! ```
//!
//! # Architecture
//!
//! - `chainstate-core`: timestamps, identifiers, records, snapshots, errors
//! - `chainstate-durability`: audit entries, audit log, file sink
//! - `chainstate-storage`: version chains, the versioned store, metadata tables
//! - `chainstate-engine`: catalogs, database wiring, configuration

pub use chainstate_core::{
    Bytes, Chain, Clock, ComponentId, ContractId, EntityRef, ManualClock, Principal, RecordId,
    RowSnapshot, Slot, StoreError, StoreResult, SystemClock, Table, Timestamp, VersionedRecord,
};
pub use chainstate_durability::{
    AuditEntry, AuditLog, AuditOperation, AuditScope, SyncMode, TimeRange,
};
pub use chainstate_engine::*;
pub use chainstate_storage::{PendingVersion, VersionChain};
