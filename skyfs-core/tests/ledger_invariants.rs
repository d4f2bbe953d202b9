use proptest::prelude::*;
use skyfs_core::activity::RequestType;
use skyfs_core::config::ProviderConfig;
use skyfs_core::contract;
use skyfs_core::keys::Identity;
use skyfs_core::ledger::StorageLedger;
use skyfs_core::snapshot::{MemorySnapshotStore, SnapshotSink};
use skyfs_core::types::Contract;
use skyfs_core::ErrorKind;
use std::sync::Arc;
use std::thread;

fn ledger(total: i64) -> (StorageLedger, Arc<MemorySnapshotStore>, Identity) {
    let identity = Identity::generate("p1");
    let store = Arc::new(MemorySnapshotStore::new());
    let config = ProviderConfig::new("p1", "local://p1", total);
    let l = StorageLedger::new(&config, identity.signing_key().clone(), store.clone()).unwrap();
    (l, store, identity)
}

fn proposal(renter: &str, space: i64) -> Contract {
    contract::build(renter, "p1", space)
}

fn check_invariant(l: &StorageLedger, renters: &[&str]) {
    let stats = l.stats().unwrap();
    assert!(stats.storage_used <= stats.storage_reserved);
    assert!(stats.storage_reserved <= l.total_capacity());
    let mut reserved = 0;
    let mut used = 0;
    for r in renters {
        if let Some(a) = l.renter_account(r).unwrap() {
            assert!(a.storage_used <= a.storage_reserved, "{r}: {a:?}");
            assert_eq!(a.storage_used, a.blocks.iter().map(|b| b.size).sum::<i64>());
            reserved += a.storage_reserved;
            used += a.storage_used;
        }
    }
    assert_eq!((reserved, used), (stats.storage_reserved, stats.storage_used));
}

#[derive(Debug, Clone)]
enum Op {
    Negotiate(usize, i64),
    Store(usize, usize, i64),
    Delete(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 1i64..400).prop_map(|(r, s)| Op::Negotiate(r, s)),
        (0usize..3, 0usize..6, 0i64..200).prop_map(|(r, b, s)| Op::Store(r, b, s)),
        (0usize..3, 0usize..6).prop_map(|(r, b)| Op::Delete(r, b)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn used_never_exceeds_reserved_never_exceeds_total(ops in proptest::collection::vec(op(), 1..40)) {
        let renters = ["ra", "rb", "rc"];
        let (l, _, _) = ledger(1000);
        for op in ops {
            let _ = match op {
                Op::Negotiate(r, s) => l.negotiate_contract(&proposal(renters[r], s)).map(|_| ()),
                Op::Store(r, b, s) => l.record_block_stored(renters[r], &format!("b{b}"), s).map(|_| ()),
                Op::Delete(r, b) => l.record_block_deleted(renters[r], &format!("b{b}")),
            };
            check_invariant(&l, &renters);
        }
    }
}

#[test]
fn accepted_contract_is_signed_and_reserved() {
    let (l, store, identity) = ledger(4 << 20);
    let p = proposal("r1", 1 << 20);
    let signed = l.negotiate_contract(&p).unwrap();
    assert!(contract::compare_contract_terms(&p, &signed));
    contract::verify(&signed, &signed.provider_signature, &identity.verifying_key()).unwrap();

    let acct = l.renter_account("r1").unwrap().unwrap();
    assert_eq!(acct.storage_reserved, 1 << 20);
    assert_eq!(acct.storage_used, 0);
    assert_eq!(acct.contracts, vec![signed.clone()]);

    let snap = store.last().unwrap();
    assert_eq!(snap.contracts, vec![signed]);
    assert_eq!(snap.stats.storage_reserved, 1 << 20);
    assert!(snap.renters.contains_key("r1"));
}

#[test]
fn over_capacity_is_rejected_without_side_effects() {
    let (l, store, _) = ledger(100);
    l.negotiate_contract(&proposal("r1", 60)).unwrap();
    let before = store.last().unwrap();
    let err = l.negotiate_contract(&proposal("r2", 50)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(l.stats().unwrap().storage_reserved, 60);
    assert_eq!(l.contracts().unwrap().len(), 1);
    assert!(l.renter_account("r2").unwrap().is_none());
    assert_eq!(store.last().unwrap(), before);

    // exactly filling the provider is fine
    l.negotiate_contract(&proposal("r2", 40)).unwrap();
}

#[test]
fn malformed_proposals_are_validation_errors() {
    let (l, _, _) = ledger(100);
    assert_eq!(l.negotiate_contract(&proposal("r1", 0)).unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(l.negotiate_contract(&proposal("r1", -5)).unwrap_err().kind(), ErrorKind::Validation);
    let elsewhere = contract::build("r1", "p9", 10);
    assert_eq!(l.negotiate_contract(&elsewhere).unwrap_err().kind(), ErrorKind::Validation);
    let p = proposal("r1", 10);
    l.negotiate_contract(&p).unwrap();
    assert_eq!(l.negotiate_contract(&p).unwrap_err().kind(), ErrorKind::Conflict);
}

#[test]
fn block_records_are_idempotent_and_bounded() {
    let (l, _, _) = ledger(100);
    l.negotiate_contract(&proposal("r1", 50)).unwrap();
    assert!(l.record_block_stored("r1", "b1", 30).unwrap());
    assert!(!l.record_block_stored("r1", "b1", 30).unwrap());
    assert_eq!(l.renter_account("r1").unwrap().unwrap().storage_used, 30);

    let err = l.record_block_stored("r1", "b1", 31).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = l.record_block_stored("r1", "b2", 21).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);
    assert_eq!(l.stats().unwrap().storage_used, 30);

    l.record_block_stored("r1", "b2", 20).unwrap();
    l.record_block_deleted("r1", "b1").unwrap();
    l.record_block_deleted("r1", "b1").unwrap();
    l.record_block_deleted("nobody", "b1").unwrap();
    assert_eq!(l.stats().unwrap().storage_used, 20);

    let err = l.record_block_stored("nobody", "b9", 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn huge_block_is_refused_without_wrapping() {
    let (l, sink, _) = ledger(100);
    l.negotiate_contract(&proposal("r1", 100)).unwrap();
    l.record_block_stored("r1", "b1", 10).unwrap();
    let before = sink.last().unwrap();

    let err = l.record_block_stored("r1", "b2", i64::MAX).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);
    let account = l.renter_account("r1").unwrap().unwrap();
    assert_eq!(account.storage_used, 10);
    assert!(account.block("b2").is_none());
    assert_eq!(l.stats().unwrap().storage_used, 10);
    assert_eq!(sink.last().unwrap(), before);
}

#[test]
fn activity_log_keeps_the_last_ten_in_order() {
    let (l, _, _) = ledger(1000);
    for i in 1..=11 {
        l.negotiate_contract(&proposal(&i.to_string(), 1)).unwrap();
    }
    let labels: Vec<String> = l.activity().unwrap().into_iter().map(|a| a.renter_id).collect();
    let expected: Vec<String> = (2..=11).map(|i: i32| i.to_string()).collect();
    assert_eq!(labels, expected);
}

#[test]
fn activity_records_request_types() {
    let (l, _, _) = ledger(1000);
    l.negotiate_contract(&proposal("r1", 100)).unwrap();
    l.record_block_stored("r1", "b1", 10).unwrap();
    l.record_block_fetched("r1", "b1");
    l.record_block_deleted("r1", "b1").unwrap();
    let kinds: Vec<RequestType> = l.activity().unwrap().iter().map(|a| a.request_type).collect();
    assert_eq!(
        kinds,
        vec![RequestType::NegotiateContract, RequestType::PostBlock, RequestType::GetBlock, RequestType::DeleteBlock]
    );
    let json = serde_json::to_string(&l.activity().unwrap()[0]).unwrap();
    assert!(json.contains("NEGOTIATE CONTRACT"));
}

#[test]
fn concurrent_negotiations_never_overbook() {
    let (l, _, _) = ledger(50);
    let l = Arc::new(l);
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let l = l.clone();
            thread::spawn(move || l.negotiate_contract(&proposal(&format!("r{}", i % 4), 10)).is_ok())
        })
        .collect();
    let accepted = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
    assert_eq!(accepted, 5);
    assert_eq!(l.stats().unwrap().storage_reserved, 50);
    check_invariant(&l, &["r0", "r1", "r2", "r3"]);
}

#[test]
fn concurrent_stores_never_exceed_reservation() {
    let (l, store, _) = ledger(1000);
    l.negotiate_contract(&proposal("r1", 100)).unwrap();
    let l = Arc::new(l);
    let handles: Vec<_> = (0..24)
        .map(|i| {
            let l = l.clone();
            thread::spawn(move || l.record_block_stored("r1", &format!("b{i}"), 10).is_ok())
        })
        .collect();
    let stored = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
    assert_eq!(stored, 10);
    let acct = l.renter_account("r1").unwrap().unwrap();
    assert_eq!(acct.storage_used, 100);
    // the last snapshot written reflects the final state
    assert_eq!(store.last().unwrap().stats.storage_used, 100);
}

#[test]
fn persistence_failure_is_reported_but_memory_moves_on() {
    let (l, store, _) = ledger(100);
    store.set_fail_saves(true);
    let err = l.negotiate_contract(&proposal("r1", 10)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(l.stats().unwrap().storage_reserved, 10);
    assert!(store.last().is_none());

    store.set_fail_saves(false);
    l.record_block_stored("r1", "b1", 5).unwrap();
    assert_eq!(store.last().unwrap().stats.storage_reserved, 10);
}

#[test]
fn restore_rebuilds_accounts_from_snapshot() {
    let (l, store, identity) = ledger(100);
    l.negotiate_contract(&proposal("r1", 40)).unwrap();
    l.negotiate_contract(&proposal("r2", 30)).unwrap();
    l.record_block_stored("r1", "b1", 25).unwrap();
    let snap = store.load().unwrap().unwrap();

    let config = ProviderConfig::new("p1", "local://p1", 100);
    let restored = StorageLedger::restore(&config, identity.signing_key().clone(), snap.clone(), store.clone()).unwrap();
    assert_eq!(restored.stats().unwrap(), l.stats().unwrap());
    assert_eq!(restored.renter_account("r1").unwrap(), l.renter_account("r1").unwrap());
    assert_eq!(restored.contracts().unwrap().len(), 2);
    // capacity left is still enforced after the restart
    let err = restored.negotiate_contract(&proposal("r3", 31)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

    let mut broken = snap;
    if let Some(a) = broken.renters.get_mut("r2") {
        a.storage_used = 31;
    }
    let err = StorageLedger::restore(&config, identity.signing_key().clone(), broken, store).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Consistency);
}
