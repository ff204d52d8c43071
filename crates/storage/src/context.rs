//! Shared write context
//!
//! Every table of one database writes through the same audit log, reads
//! bookkeeping time from the same clock and observes the same shutdown flag.

use crate::mutation_clock::MutationClock;
use chainstate_core::{StoreError, StoreResult};
use chainstate_durability::AuditLog;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default time a writer waits for an identity before reporting a conflict
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Open/closed flag shared by every table of a database
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// Flag in the open state
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse further mutations
    pub fn shut_down(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether `shut_down` has been called
    pub fn is_shut_down(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fails with `Persistence` once shut down
    pub fn check(&self) -> StoreResult<()> {
        if self.is_shut_down() {
            return Err(StoreError::persistence("database is closed"));
        }
        Ok(())
    }
}

/// Everything a table needs to commit a mutation
#[derive(Clone)]
pub struct StoreContext {
    /// Audit log every mutation is recorded in
    pub audit: Arc<AuditLog>,
    /// Bookkeeping time
    pub clock: MutationClock,
    /// Writer lock acquisition timeout
    pub lock_timeout: Duration,
    /// Shutdown flag
    pub liveness: Liveness,
}

impl StoreContext {
    /// Context over `audit` with the system clock and default timeout
    pub fn new(audit: Arc<AuditLog>) -> Self {
        StoreContext {
            audit,
            clock: MutationClock::system(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            liveness: Liveness::new(),
        }
    }

    /// In-memory audit log, system clock
    pub fn in_memory() -> Self {
        Self::new(Arc::new(AuditLog::in_memory()))
    }

    /// Replace the bookkeeping clock
    pub fn with_clock(mut self, clock: MutationClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the writer lock timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
