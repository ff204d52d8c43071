//! Engine configuration via `chainstate.toml`
//!
//! `Database::open(dir)` creates a default `chainstate.toml` in the data
//! directory on first open. To change settings, edit the file and reopen.

use chainstate_core::{StoreError, StoreResult};
use chainstate_durability::SyncMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "chainstate.toml";

fn default_lock_timeout_ms() -> u64 {
    1000
}

fn default_sync() -> String {
    "flush".to_string()
}

/// Audit log persistence settings (`[audit]` section).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
    /// Audit file; relative paths resolve against the data directory.
    /// Absent means the audit log is kept in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// `"flush"` (default) or `"always"` (fsync every append)
    #[serde(default = "default_sync")]
    pub sync: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync: default_sync(),
        }
    }
}

/// Backoff for `Database::with_retry` (`[retry]` section).
///
/// A write that reports `IdentityConflict` has already waited
/// `lock_timeout_ms` for the identity's writer, and the holder only keeps
/// the lock for one audit append. Pauses therefore start small: retry `n`
/// sleeps `first_pause_ms * 2^n`, never longer than `max_pause_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictBackoff {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    /// Pause before the first retry
    pub first_pause_ms: u64,
    /// Longest pause between two attempts
    pub max_pause_ms: u64,
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self {
            max_retries: 4,
            first_pause_ms: 2,
            max_pause_ms: 50,
        }
    }
}

impl ConflictBackoff {
    /// Fail on the first conflict
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff with the given pause bounds
    pub fn with_pauses(mut self, first: Duration, max: Duration) -> Self {
        self.first_pause_ms = first.as_millis() as u64;
        self.max_pause_ms = max.as_millis() as u64;
        self
    }

    /// Backoff allowing `max_retries` retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Pause before retry number `retry` (0-based)
    pub fn pause(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(self.first_pause_ms.saturating_mul(factor).min(self.max_pause_ms))
    }
}

/// Engine configuration loaded from `chainstate.toml`.
///
/// # Example
///
/// ```toml
/// lock_timeout_ms = 1000
///
/// [audit]
/// path = "audit.jsonl"
/// sync = "flush"
///
/// [retry]
/// max_retries = 4
/// first_pause_ms = 2
/// max_pause_ms = 50
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// How long a writer waits for an identity before `IdentityConflict`.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Audit persistence.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Backoff used by `Database::with_retry`.
    #[serde(default)]
    pub retry: ConflictBackoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            audit: AuditConfig::default(),
            retry: ConflictBackoff::default(),
        }
    }
}

impl EngineConfig {
    /// Config persisting the audit log at `path`
    pub fn with_audit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit.path = Some(path.into());
        self
    }

    /// Config with the given writer lock timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Writer lock timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Parse the audit sync string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"flush"` or `"always"`.
    pub fn sync_mode(&self) -> StoreResult<SyncMode> {
        SyncMode::parse(&self.audit.sync).map_err(|_| {
            StoreError::invalid_input(format!(
                "Invalid audit sync mode '{}' in {}. Expected \"flush\" or \"always\".",
                self.audit.sync, CONFIG_FILE_NAME
            ))
        })
    }

    /// Check every setting.
    pub fn validate(&self) -> StoreResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(StoreError::invalid_input(
                "lock_timeout_ms must be greater than zero",
            ));
        }
        self.sync_mode()?;
        if self.retry.first_pause_ms > self.retry.max_pause_ms {
            return Err(StoreError::invalid_input(format!(
                "retry.first_pause_ms ({}) exceeds retry.max_pause_ms ({})",
                self.retry.first_pause_ms, self.retry.max_pause_ms
            )));
        }
        Ok(())
    }

    /// Audit path with relative paths resolved against `data_dir`
    pub fn resolved_audit_path(&self, data_dir: &Path) -> Option<PathBuf> {
        self.audit.path.as_ref().map(|p| {
            if p.is_relative() {
                data_dir.join(p)
            } else {
                p.clone()
            }
        })
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Chainstate engine configuration
#
# Milliseconds a writer waits for another writer of the same identity
# before failing with a retryable identity conflict.
lock_timeout_ms = 1000

[audit]
# Audit log file, relative to the data directory.
path = "audit.jsonl"
# "flush" (default) = write through to the OS on every commit
# "always"          = fsync every commit
sync = "flush"

# Database::with_retry backoff after an identity conflict. Each retry
# doubles the pause, starting at first_pause_ms, up to max_pause_ms.
[retry]
max_retries = 4
first_pause_ms = 2
max_pause_ms = 50
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::persistence(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            StoreError::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> StoreResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                StoreError::persistence(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> StoreResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            StoreError::invalid_input(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content).map_err(|e| {
            StoreError::persistence(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_in_memory() {
        let config = EngineConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_millis(1000));
        assert!(config.audit.path.is_none());
        assert_eq!(config.sync_mode().unwrap(), SyncMode::Flush);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_always() {
        let config: EngineConfig = toml::from_str("[audit]\nsync = \"always\"").unwrap();
        assert_eq!(config.sync_mode().unwrap(), SyncMode::Always);
        assert_eq!(config.lock_timeout_ms, 1000);
    }

    #[test]
    fn parse_invalid_sync_returns_error() {
        let config: EngineConfig = toml::from_str("[audit]\nsync = \"sometimes\"").unwrap();
        assert!(config.sync_mode().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_lock_timeout_rejected() {
        let config: EngineConfig = toml::from_str("lock_timeout_ms = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn default_toml_parses_correctly() {
        let config: EngineConfig = toml::from_str(EngineConfig::default_toml()).unwrap();
        assert_eq!(config.audit.path, Some(PathBuf::from("audit.jsonl")));
        assert_eq!(config.retry, ConflictBackoff::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn relative_audit_path_resolves_against_data_dir() {
        let config = EngineConfig::default().with_audit_path("audit.jsonl");
        assert_eq!(
            config.resolved_audit_path(Path::new("/data")),
            Some(PathBuf::from("/data/audit.jsonl"))
        );
        assert!(EngineConfig::default()
            .resolved_audit_path(Path::new("/data"))
            .is_none());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "lock_timeout_ms = 5\n").unwrap();
        EngineConfig::write_default_if_missing(&path).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.lock_timeout_ms, 5);
    }

    #[test]
    fn write_to_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = EngineConfig::default()
            .with_audit_path("log/audit.jsonl")
            .with_lock_timeout(Duration::from_millis(250));

        config.write_to_file(&path).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn conflict_backoff_doubles_then_caps() {
        let backoff = ConflictBackoff::default();
        let pauses: Vec<u64> = (0..7).map(|n| backoff.pause(n).as_millis() as u64).collect();
        assert_eq!(pauses, vec![2, 4, 8, 16, 32, 50, 50]);
        assert_eq!(backoff.pause(200), Duration::from_millis(50));
        assert_eq!(ConflictBackoff::disabled().max_retries, 0);
    }

    #[test]
    fn inverted_pause_bounds_rejected() {
        let config: EngineConfig =
            toml::from_str("[retry]\nfirst_pause_ms = 100\nmax_pause_ms = 10").unwrap();
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidInput { .. })
        ));
    }
}
