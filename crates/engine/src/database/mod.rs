//! Database struct and open/close logic
//!
//! This module provides the main Database struct that wires together:
//! - The audit log (in memory, or a JSON-lines file replayed on open)
//! - The five entity catalogs and the extraction state table
//! - Shared bookkeeping clock, writer lock timeout and shutdown flag
//!
//! ## Opening
//!
//! - `Database::open(dir)`: reads `chainstate.toml` in `dir`, writing the
//!   default config first if missing
//! - `Database::open_with_config(config)`: explicit configuration
//! - `Database::with_clock(config, clock)`: explicit bookkeeping clock
//! - `Database::ephemeral()`: in-memory, nothing touches disk
//!
//! Opening an audit file that is already open in this process returns the
//! existing instance.
//!
//! Replaying the audit file rebuilds every catalog's version chains and the
//! extraction state rows, so a reopened database answers `current`,
//! `as_of` and `history` exactly as before and keeps rejecting writes that
//! do not advance a chain.

pub mod config;
mod registry;

pub use config::{AuditConfig, ConflictBackoff, EngineConfig, CONFIG_FILE_NAME};
pub use registry::OPEN_DATABASES;

use crate::primitives::{
    Catalog, ComponentContract, ContractBalance, ContractCode, ContractStorage, ExtractionStates,
    ProtocolState,
};
use chainstate_core::{Clock, StoreError, StoreResult, SystemClock};
use chainstate_durability::{AuditEntry, AuditLog, AuditScope, JsonLinesSink, TimeRange};
use chainstate_storage::{MutationClock, StoreContext};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

/// Temporal store for on-chain entity state with a complete audit trail
pub struct Database {
    config: EngineConfig,
    audit_path: Option<PathBuf>,
    ctx: StoreContext,
    protocol_state: Catalog<ProtocolState>,
    contract_balance: Catalog<ContractBalance>,
    contract_code: Catalog<ContractCode>,
    contract_storage: Catalog<ContractStorage>,
    component_contract: Catalog<ComponentContract>,
    extraction_state: ExtractionStates,
}

impl Database {
    // ========================================================================
    // Opening
    // ========================================================================

    /// Open a database in the data directory `dir`
    ///
    /// Creates `dir` and a default `chainstate.toml` if needed; a relative
    /// audit path in the config resolves against `dir`.
    ///
    /// # Example
    ///
    /// ```text
    /// use chainstate_engine::Database;
    ///
    /// let db = Database::open("/path/to/data")?;
    /// ```
    pub fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Arc<Self>> {
        let data_dir = dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        EngineConfig::write_default_if_missing(&config_path)?;
        let cfg = EngineConfig::from_file(&config_path)?;
        let audit_path = cfg.resolved_audit_path(data_dir);

        Self::open_inner(cfg, audit_path, Arc::new(SystemClock))
    }

    /// Open with an explicit configuration and the system clock
    pub fn open_with_config(cfg: EngineConfig) -> StoreResult<Arc<Self>> {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    /// Open with an explicit configuration and bookkeeping clock
    pub fn with_clock(cfg: EngineConfig, clock: Arc<dyn Clock>) -> StoreResult<Arc<Self>> {
        let audit_path = cfg.audit.path.clone();
        Self::open_inner(cfg, audit_path, clock)
    }

    /// In-memory database with default settings
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self::assemble(
            EngineConfig::default(),
            AuditLog::in_memory(),
            None,
            Arc::new(SystemClock),
        ))
    }

    fn open_inner(
        cfg: EngineConfig,
        audit_path: Option<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Arc<Self>> {
        cfg.validate()?;

        let path = match audit_path {
            None => {
                info!(target: "chainstate::engine", "Opened in-memory database");
                return Ok(Arc::new(Self::assemble(
                    cfg,
                    AuditLog::in_memory(),
                    None,
                    clock,
                )));
            }
            Some(path) => canonical_audit_path(&path)?,
        };

        // The registry lock is held until the new instance is registered.
        let mut registry = OPEN_DATABASES.lock();
        if let Some(db) = registry.get(&path).and_then(Weak::upgrade) {
            if db.is_open() {
                info!(target: "chainstate::engine", path = ?path, "Returning existing database instance");
                return Ok(db);
            }
            // Dropping the last reference re-enters the registry.
            drop(registry);
            drop(db);
            registry = OPEN_DATABASES.lock();
        }

        let history = JsonLinesSink::replay(&path)?;
        let sink = JsonLinesSink::open(&path, cfg.sync_mode()?)?;
        let replayed = history.len();

        let db = Arc::new(Self::assemble(
            cfg,
            AuditLog::with_history(Box::new(sink), history),
            Some(path.clone()),
            clock,
        ));
        let versions = db.restore()?;
        registry.insert(path.clone(), Arc::downgrade(&db));

        info!(
            target: "chainstate::engine",
            path = ?path,
            replayed,
            versions,
            "Opened database"
        );
        Ok(db)
    }

    fn assemble(
        config: EngineConfig,
        audit: AuditLog,
        audit_path: Option<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ctx = StoreContext::new(Arc::new(audit))
            .with_clock(MutationClock::new(clock))
            .with_lock_timeout(config.lock_timeout());
        Database {
            protocol_state: Catalog::new(ctx.clone()),
            contract_balance: Catalog::new(ctx.clone()),
            contract_code: Catalog::new(ctx.clone()),
            contract_storage: Catalog::new(ctx.clone()),
            component_contract: Catalog::new(ctx.clone()),
            extraction_state: ExtractionStates::new(ctx.clone()),
            config,
            audit_path,
            ctx,
        }
    }

    /// Rebuild catalogs and extraction state from the replayed audit log
    ///
    /// Returns the number of versions restored across catalogs.
    fn restore(&self) -> StoreResult<usize> {
        let entries: Vec<AuditEntry> = self
            .ctx
            .audit
            .query(&AuditScope::All, TimeRange::all())
            .collect();
        let versions = self.protocol_state.restore(&entries)?
            + self.contract_balance.restore(&entries)?
            + self.contract_code.restore(&entries)?
            + self.contract_storage.restore(&entries)?
            + self.component_contract.restore(&entries)?;
        self.extraction_state.restore(&entries)?;
        Ok(versions)
    }

    // ========================================================================
    // Catalogs
    // ========================================================================

    /// Protocol component state
    pub fn protocol_state(&self) -> &Catalog<ProtocolState> {
        &self.protocol_state
    }

    /// Contract balances
    pub fn contract_balance(&self) -> &Catalog<ContractBalance> {
        &self.contract_balance
    }

    /// Contract code
    pub fn contract_code(&self) -> &Catalog<ContractCode> {
        &self.contract_code
    }

    /// Contract storage slots
    pub fn contract_storage(&self) -> &Catalog<ContractStorage> {
        &self.contract_storage
    }

    /// Component ↔ contract associations
    pub fn component_contract(&self) -> &Catalog<ComponentContract> {
        &self.component_contract
    }

    /// Extractor cursors
    pub fn extraction_state(&self) -> &ExtractionStates {
        &self.extraction_state
    }

    /// Audit log shared by every table
    pub fn audit(&self) -> &AuditLog {
        &self.ctx.audit
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Canonical audit file path, if persisted
    pub fn audit_path(&self) -> Option<&Path> {
        self.audit_path.as_deref()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Whether the database still accepts mutations
    pub fn is_open(&self) -> bool {
        !self.ctx.liveness.is_shut_down()
    }

    /// Stop accepting mutations and sync the audit log
    ///
    /// Reads keep working. Mutations after shutdown fail with `Persistence`.
    ///
    /// # Example
    ///
    /// ```text
    /// db.shutdown()?;
    /// assert!(!db.is_open());
    /// ```
    pub fn shutdown(&self) -> StoreResult<()> {
        self.ctx.liveness.shut_down();
        self.ctx.audit.sync()?;
        info!(target: "chainstate::engine", entries = self.ctx.audit.len(), "Database shut down");
        Ok(())
    }

    /// Run `f`, retrying retryable failures with the configured [`ConflictBackoff`]
    ///
    /// `OutOfOrderWrite`, `AuditWrite`, `InvalidInput` and `NotFound` are
    /// returned immediately; `IdentityConflict` and `Persistence` are retried
    /// up to `retry.max_retries` times while the database is open.
    pub fn with_retry<T, F>(&self, mut f: F) -> StoreResult<T>
    where
        F: FnMut(&Database) -> StoreResult<T>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            match f(self) {
                Err(e) if e.is_retryable() && attempt < retry.max_retries && self.is_open() => {
                    let delay = retry.pause(attempt);
                    warn!(
                        target: "chainstate::engine",
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after retryable error"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.ctx.audit.sync();

        if let Some(path) = &self.audit_path {
            let mut registry = OPEN_DATABASES.lock();
            // A newer instance may already be registered for this path.
            if registry.get(path).map_or(false, |w| w.strong_count() == 0) {
                registry.remove(path);
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("audit_path", &self.audit_path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Absolute path of the audit file, creating its directory
fn canonical_audit_path(path: &Path) -> StoreResult<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| StoreError::invalid_input(format!("audit path '{}' has no file name", path.display())))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    Ok(parent.canonicalize()?.join(file_name))
}
