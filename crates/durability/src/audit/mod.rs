//! Audit trail
//!
//! - `entry`: immutable `AuditEntry` records with before/after row snapshots
//! - `log`: the append-only `AuditLog` with table/identity/time indexes
//! - `sink`: the `AuditSink` durability seam
//! - `jsonl`: checksummed JSON-lines file sink with replay

pub mod entry;
pub mod jsonl;
pub mod log;
pub mod sink;

pub use entry::{AuditEntry, AuditOperation};
pub use jsonl::JsonLinesSink;
pub use log::{AuditCursor, AuditLog, AuditScope, TimeRange};
pub use sink::{AuditSink, NullSink, SyncMode};
