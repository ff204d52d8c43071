//! Integration tests for the entity catalogs
//!
//! Exercises every catalog through one Database so the shared audit log,
//! clock and lifecycle are covered together.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chainstate_core::{
    Bytes, Chain, ComponentId, ContractId, EntityRef, ManualClock, Principal, StoreError, Table,
    Timestamp,
};
use chainstate_durability::{AuditOperation, AuditScope, TimeRange};
use chainstate_engine::{
    Balance, ComponentState, ContractBalance, ContractCode, ContractStorage, Database,
    EngineConfig, ExtractionState, ExtractorKey, ProtocolState, SlotKey,
};

fn ts(us: u64) -> Timestamp {
    Timestamp::from_micros(us)
}

fn principal() -> Principal {
    Principal::new("indexer")
}

#[test]
fn test_each_catalog_versions_independently() {
    let db = Database::ephemeral();
    let pool = ComponentId::new("pool");
    let c1 = ContractId::new([0xc1u8]);
    let p = principal();

    db.protocol_state()
        .record(ProtocolState::new(pool.clone(), ComponentState::with_tvl(1.0)), ts(100), &p)
        .unwrap();
    db.contract_balance()
        .record(ContractBalance::new(c1.clone(), Balance::from_u128(5)), ts(100), &p)
        .unwrap();
    db.contract_code()
        .record(ContractCode::new(c1.clone(), vec![0x60, 0x80]), ts(100), &p)
        .unwrap();
    db.contract_storage()
        .record(ContractStorage::new(c1.clone(), Bytes::from([1u8]), Some(Bytes::from([9u8]))), ts(100), &p)
        .unwrap();
    db.component_contract()
        .link(pool.clone(), c1.clone(), ts(100), &p)
        .unwrap();

    // A code upgrade supersedes only the code chain
    db.contract_code()
        .record(ContractCode::new(c1.clone(), vec![0x60, 0x81]), ts(200), &p)
        .unwrap();

    assert_eq!(db.contract_code().history(&c1).len(), 2);
    assert!(db.contract_code().current(&c1).unwrap().payload.verify());
    assert_eq!(db.contract_balance().history(&c1).len(), 1);
    assert_eq!(db.contract_storage().slots_of(&c1).len(), 1);
    assert_eq!(db.component_contract().contracts_of(&pool), vec![c1.clone()]);
    assert_eq!(db.protocol_state().tvl_of(&pool, None), Some(1.0));

    // 5 inserts + 1 close + 1 insert
    assert_eq!(db.audit().len(), 7);
    for table in [
        Table::ProtocolState,
        Table::ContractBalance,
        Table::ContractStorage,
        Table::ComponentContract,
    ] {
        assert_eq!(
            db.audit()
                .query(&AuditScope::Table(table), TimeRange::all())
                .count(),
            1
        );
    }
}

#[test]
fn test_changed_between_reports_forward_delta() {
    let db = Database::ephemeral();
    let c1 = ContractId::new([0xc1u8]);
    let c2 = ContractId::new([0xc2u8]);
    let p = principal();
    let balances = db.contract_balance();

    balances
        .record(ContractBalance::new(c1.clone(), Balance::from_u128(1)), ts(100), &p)
        .unwrap();
    balances
        .record(ContractBalance::new(c2.clone(), Balance::from_u128(2)), ts(150), &p)
        .unwrap();
    balances
        .record(ContractBalance::new(c1.clone(), Balance::from_u128(3)), ts(200), &p)
        .unwrap();

    let delta = balances.changed_between(ts(100), ts(200));
    let seen: Vec<(ContractId, Timestamp)> =
        delta.iter().map(|v| (v.identity.clone(), v.valid_from)).collect();
    assert_eq!(seen, vec![(c2, ts(150)), (c1, ts(200))]);
    assert_eq!(balances.current_all().len(), 2);
}

#[test]
fn test_bookkeeping_uses_database_clock() {
    let clock = Arc::new(ManualClock::new(ts(1_000)));
    let db = Database::with_clock(EngineConfig::default(), clock.clone()).unwrap();
    let key = ExtractorKey::new("uniswap_v2", Chain::Ethereum);
    let p = principal();

    let row = db
        .extraction_state()
        .save(key.clone(), ExtractionState::default(), &p)
        .unwrap();
    assert_eq!(row.inserted_at, ts(1_000));

    clock.advance(Duration::from_micros(500));
    let row = db
        .extraction_state()
        .advance(&key, Bytes::from([1u8]), Bytes::from([2u8]), &p)
        .unwrap();
    assert_eq!(row.inserted_at, ts(1_000));
    assert_eq!(row.modified_at, ts(1_500));

    let entries: Vec<_> = db
        .audit()
        .for_entity(&EntityRef::new(Table::ExtractionState, "ethereum:uniswap_v2"))
        .collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].operation, AuditOperation::Update);
    assert_eq!(entries[1].timestamp, ts(1_500));
    let changed = entries[1]
        .before
        .as_ref()
        .unwrap()
        .changed_fields(entries[1].after.as_ref().unwrap());
    assert_eq!(changed, vec!["block_hash", "cursor", "modified_at"]);
}

#[test]
fn test_writers_with_retry_on_shared_slot() {
    let db = Database::open_with_config(
        EngineConfig::default().with_lock_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    let c1 = ContractId::new([0xc1u8]);
    let key = SlotKey::new(c1.clone(), Bytes::from([0u8]));

    let handles: Vec<_> = (0..4u64)
        .map(|w| {
            let db = Arc::clone(&db);
            let c1 = c1.clone();
            thread::spawn(move || {
                let p = Principal::new(format!("writer-{}", w));
                let mut committed = 0;
                for i in 0..50u64 {
                    let at = ts(1 + i * 4 + w);
                    let value = Some(Bytes::from(at.as_micros().to_be_bytes()));
                    let result = db.with_retry(|db| {
                        db.contract_storage().record(
                            ContractStorage::new(c1.clone(), Bytes::from([0u8]), value.clone()),
                            at,
                            &p,
                        )
                    });
                    match result {
                        Ok(_) => committed += 1,
                        Err(StoreError::OutOfOrderWrite { .. }) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                committed
            })
        })
        .collect();

    let committed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let chain = db.contract_storage().chain(&key).unwrap();
    chain.check_invariants().unwrap();
    assert_eq!(chain.len(), committed);

    // Each version links to the value it replaced
    let history = db.contract_storage().history(&key);
    for pair in history.windows(2) {
        assert_eq!(pair[1].payload.previous_value, pair[0].payload.value);
    }
}
