//! Audit log persistence across reopen
//!
//! Entries recorded through a file-backed `AuditLog` must be fully recoverable
//! by replaying the file, and a reopened log must continue the sequence.

use chainstate_core::{EntityRef, Principal, RowSnapshot, Table, Timestamp};
use chainstate_durability::{
    AuditEntry, AuditLog, AuditOperation, AuditScope, JsonLinesSink, SyncMode, TimeRange,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn balance_insert(identity: &str, ts: u64) -> AuditEntry {
    AuditEntry::insert(
        EntityRef::new(Table::ContractBalance, identity),
        RowSnapshot::new().with("balance", ts),
        Timestamp::from_micros(ts),
        &Principal::new("ingest"),
    )
}

#[test]
fn test_reopen_preserves_entries_and_sequence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit.log");

    {
        let sink = JsonLinesSink::open(&path, SyncMode::Flush).unwrap();
        let log = AuditLog::new(Box::new(sink));
        log.record(balance_insert("c1", 100)).unwrap();
        log.record_all(vec![
            AuditEntry::update(
                EntityRef::new(Table::ContractBalance, "c1"),
                RowSnapshot::new().with("valid_to", serde_json::Value::Null),
                RowSnapshot::new().with("valid_to", 200u64),
                Timestamp::from_micros(200),
                &Principal::new("ingest"),
            ),
            balance_insert("c1", 200),
        ])
        .unwrap();
        log.sync().unwrap();
    }

    let history = JsonLinesSink::replay(&path).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(
        history.iter().map(|e| e.seq).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let sink = JsonLinesSink::open(&path, SyncMode::Flush).unwrap();
    let log = AuditLog::with_history(Box::new(sink), history);
    assert_eq!(log.record(balance_insert("c2", 300)).unwrap(), 4);

    let c1: Vec<_> = log
        .for_entity(&EntityRef::new(Table::ContractBalance, "c1"))
        .collect();
    assert_eq!(c1.len(), 3);
    assert_eq!(
        c1.iter()
            .filter(|e| e.operation == AuditOperation::Insert)
            .count(),
        2
    );
}

#[test]
fn test_concurrent_appends_all_durable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit.log");
    let sink = JsonLinesSink::open(&path, SyncMode::Flush).unwrap();
    let log = Arc::new(AuditLog::new(Box::new(sink)));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..50u64 {
                    log.record(balance_insert(&format!("c{}", t), i)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    log.sync().unwrap();

    let replayed = JsonLinesSink::replay(&path).unwrap();
    assert_eq!(replayed.len(), 400);

    let mut seqs: Vec<u64> = replayed.iter().map(|e| e.seq).collect();
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), 400, "sequence numbers must be unique");
    assert_eq!(
        log.query(&AuditScope::Table(Table::ContractBalance), TimeRange::all())
            .len(),
        400
    );
}
