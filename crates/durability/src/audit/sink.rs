//! Audit sinks
//!
//! A sink is where audit entries become durable. The [`AuditLog`](super::AuditLog)
//! hands every commit group to its sink before publishing the entries; a sink
//! error aborts the mutation that produced them.

use super::entry::AuditEntry;
use chainstate_core::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// Destination for committed audit entries
pub trait AuditSink: Send + Sync {
    /// Persist one commit group; all entries or none
    fn append(&self, entries: &[AuditEntry]) -> StoreResult<()>;

    /// Force previously appended entries to stable storage
    fn sync(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Sink that keeps nothing beyond the in-memory log index
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn append(&self, _entries: &[AuditEntry]) -> StoreResult<()> {
        Ok(())
    }
}

/// When appended audit data reaches the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Flush to OS buffers on every append; fsync on `sync()`
    #[default]
    Flush,
    /// fsync on every append
    Always,
}

impl SyncMode {
    /// Parse the configuration spelling
    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "flush" => Ok(SyncMode::Flush),
            "always" => Ok(SyncMode::Always),
            other => Err(StoreError::invalid_input(format!(
                "invalid audit sync mode '{}', expected \"flush\" or \"always\"",
                other
            ))),
        }
    }
}
