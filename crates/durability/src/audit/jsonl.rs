//! Checksummed JSON-lines audit file
//!
//! # Format
//!
//! One line per commit group:
//!
//! ```text
//! <crc32 of body, 8 hex digits> <body: JSON array of AuditEntry>\n
//! ```
//!
//! A group is written with a single `write_all`, so a crash leaves at most one
//! torn line at the end of the file. Replay ignores a torn tail and fails on
//! any complete line whose checksum or JSON does not verify. `open` truncates a
//! torn tail before appending so new groups never share a line with it.
//!
//! After a failed write the sink is poisoned: the file may end in a partial
//! line, so further appends are refused until the file is reopened.

use super::entry::AuditEntry;
use super::sink::{AuditSink, SyncMode};
use chainstate_core::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Append-only audit file sink
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    mode: SyncMode,
    poisoned: AtomicBool,
}

impl JsonLinesSink {
    /// Open or create the audit file at `path`
    ///
    /// Creates parent directories if needed and drops a torn final line.
    pub fn open<P: AsRef<Path>>(path: P, mode: SyncMode) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            truncate_torn_tail(&path)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(JsonLinesSink {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            mode,
            poisoned: AtomicBool::new(false),
        })
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured sync mode
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Read every committed entry from an audit file
    ///
    /// A missing file yields no entries. A torn final line is skipped with a
    /// warning; a corrupt complete line is an error.
    pub fn replay<P: AsRef<Path>>(path: P) -> StoreResult<Vec<AuditEntry>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let data = std::fs::read(path)?;
        let mut entries = Vec::new();
        let mut rest: &[u8] = &data;
        let mut line_no = 0usize;

        while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
            line_no += 1;
            let line = &rest[..newline];
            rest = &rest[newline + 1..];
            if line.is_empty() {
                continue;
            }
            let group = decode_line(line).map_err(|reason| {
                StoreError::persistence(format!(
                    "corrupt audit log '{}' at line {}: {}",
                    path.display(),
                    line_no,
                    reason
                ))
            })?;
            entries.extend(group);
        }

        if !rest.is_empty() {
            warn!(
                target: "chainstate::audit",
                path = %path.display(),
                bytes = rest.len(),
                "Ignoring torn audit log tail"
            );
        }

        info!(
            target: "chainstate::audit",
            path = %path.display(),
            entries = entries.len(),
            "Audit log replayed"
        );
        Ok(entries)
    }
}

impl AuditSink for JsonLinesSink {
    fn append(&self, entries: &[AuditEntry]) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if self.poisoned.load(Ordering::Acquire) {
            return Err(StoreError::audit_write(format!(
                "audit log '{}' is poisoned by an earlier write failure",
                self.path.display()
            )));
        }

        let line = encode_line(entries)?;
        let mut writer = self.writer.lock();

        let result = writer.write_all(&line).and_then(|_| match self.mode {
            SyncMode::Flush => writer.flush(),
            SyncMode::Always => writer.flush().and_then(|_| writer.get_mut().sync_all()),
        });

        result.map_err(|e| {
            self.poisoned.store(true, Ordering::Release);
            warn!(target: "chainstate::audit", path = %self.path.display(), error = %e, "Audit append failed");
            StoreError::audit_write(format!(
                "failed to append to '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    fn sync(&self) -> StoreResult<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_mut().sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("poisoned", &self.poisoned.load(Ordering::Relaxed))
            .finish()
    }
}

fn encode_line(entries: &[AuditEntry]) -> StoreResult<Vec<u8>> {
    let body = serde_json::to_string(entries)
        .map_err(|e| StoreError::audit_write(format!("failed to encode audit entries: {}", e)))?;
    let crc = crc32fast::hash(body.as_bytes());
    Ok(format!("{:08x} {}\n", crc, body).into_bytes())
}

fn decode_line(line: &[u8]) -> Result<Vec<AuditEntry>, String> {
    let text = std::str::from_utf8(line).map_err(|e| e.to_string())?;
    let (crc_hex, body) = text
        .split_once(' ')
        .ok_or_else(|| "missing checksum separator".to_string())?;
    let expected = u32::from_str_radix(crc_hex, 16).map_err(|e| e.to_string())?;
    let actual = crc32fast::hash(body.as_bytes());
    if expected != actual {
        return Err(format!(
            "checksum mismatch (expected {:08x}, got {:08x})",
            expected, actual
        ));
    }
    serde_json::from_str(body).map_err(|e| e.to_string())
}

fn truncate_torn_tail(path: &Path) -> StoreResult<()> {
    let data = std::fs::read(path)?;
    let valid_len = data
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);
    if valid_len < data.len() {
        warn!(
            target: "chainstate::audit",
            path = %path.display(),
            dropped = data.len() - valid_len,
            "Truncating torn audit log tail"
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len as u64)?;
        file.sync_all()?;
    }
    Ok(())
}
