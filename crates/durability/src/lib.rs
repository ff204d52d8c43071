//! Durability layer for chainstate
//!
//! This crate owns the audit trail, the part of the system that must survive
//! process restarts:
//!
//! - AuditEntry: before/after image of one insert, update or delete
//! - AuditLog: append-only log indexed by table, identity and time
//! - AuditSink: durability seam (`NullSink`, `JsonLinesSink`)
//! - Fault injection sink for failure-path tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod faults;

pub use audit::{
    AuditCursor, AuditEntry, AuditLog, AuditOperation, AuditScope, AuditSink, JsonLinesSink,
    NullSink, SyncMode, TimeRange,
};
pub use faults::{FaultHandle, FaultySink};
