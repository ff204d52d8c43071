//! Fault injection for audit sinks
//!
//! [`FaultySink`] accepts appends until told to fail, letting tests verify
//! that a failed audit append aborts the enclosing mutation.

use crate::audit::{AuditEntry, AuditSink};
use chainstate_core::{StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct FaultState {
    fail_remaining: AtomicUsize,
    fail_always: AtomicBool,
    groups: AtomicUsize,
    entries: AtomicUsize,
}

/// In-memory sink with controllable failures
#[derive(Debug, Default)]
pub struct FaultySink {
    state: Arc<FaultState>,
}

/// Control handle kept by the test after the sink is moved into a log
#[derive(Debug, Clone)]
pub struct FaultHandle {
    state: Arc<FaultState>,
}

impl FaultySink {
    /// Sink that succeeds until instructed otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle controlling this sink
    pub fn handle(&self) -> FaultHandle {
        FaultHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl FaultHandle {
    /// Fail the next `n` appends
    pub fn fail_next_appends(&self, n: usize) {
        self.state.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every append until turned off
    pub fn set_fail_always(&self, fail: bool) {
        self.state.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Commit groups accepted so far
    pub fn groups_appended(&self) -> usize {
        self.state.groups.load(Ordering::SeqCst)
    }

    /// Entries accepted so far
    pub fn entries_appended(&self) -> usize {
        self.state.entries.load(Ordering::SeqCst)
    }
}

impl AuditSink for FaultySink {
    fn append(&self, entries: &[AuditEntry]) -> StoreResult<()> {
        let injected = self.state.fail_always.load(Ordering::SeqCst)
            || self
                .state
                .fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            return Err(StoreError::audit_write("injected audit sink failure"));
        }
        self.state.groups.fetch_add(1, Ordering::SeqCst);
        self.state.entries.fetch_add(entries.len(), Ordering::SeqCst);
        Ok(())
    }
}
