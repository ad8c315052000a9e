//! Snapshot isolation and working-copy semantics
//!
//! Snapshots never move under a reader; working copies are identity-stable
//! within a transaction; the two dirtiness policies diverge exactly on
//! bounce-back writes.

use mvstm::prelude::*;
use mvstm_txn::TypedTranlocal;

use crate::common::init_tracing;

// A transaction must never migrate to another thread.
static_assertions::assert_not_impl_any!(Transaction: Send, Sync);

// ============================================================================
// Snapshot stability
// ============================================================================

#[test]
fn pinned_snapshot_ignores_later_commits() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();

    // Pin a snapshot by holding a transaction open.
    let mut pinned = stm.begin();
    let read_version = pinned.read_version();

    // Move the heap forward underneath it.
    stm.atomically(|tx| cell.set(tx, 2)).unwrap();
    stm.atomically(|tx| cell.set(tx, 3)).unwrap();

    // The pinned transaction still reads the old state, any number of times.
    for _ in 0..3 {
        let seen = *pinned
            .load_typed::<u64>(cell.handle(), cell.policy())
            .unwrap()
            .value();
        assert_eq!(seen, 1);
    }
    assert_eq!(pinned.read_version(), read_version);

    // A fresh transaction sees the latest state.
    assert_eq!(stm.atomically(|tx| cell.get(tx)).unwrap(), 3);
}

#[test]
fn begin_at_serves_retained_history_and_rejects_pruned() {
    init_tracing();
    let stm = Stm::with_chain_depth(2);
    let cell = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();

    for round in 1..=5u64 {
        stm.atomically(|tx| cell.set(tx, round)).unwrap();
    }
    let newest = stm.active_version();

    // The previous version is retained at depth 2...
    let mut old = stm.begin_at(newest - 1).unwrap();
    let seen = *old
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .value();
    assert_eq!(seen, 4);

    // ...but anything older has been pruned.
    let err = stm.begin_at(newest - 3).unwrap_err();
    assert!(matches!(err, StmError::LoadTooOld { .. }));
}

// ============================================================================
// Working-copy identity
// ============================================================================

#[test]
fn loads_of_the_same_object_share_one_working_copy() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 5u64)).unwrap();

    let mut tx = stm.begin();
    let first = tx
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap() as *const TypedTranlocal<u64>;
    for _ in 0..5 {
        let again = tx
            .load_typed::<u64>(cell.handle(), cell.policy())
            .unwrap() as *const TypedTranlocal<u64>;
        assert_eq!(first, again);
    }
}

#[test]
fn uncommitted_writes_stay_private() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();

    let mut writer = stm.begin();
    writer
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(99);

    // Another transaction cannot see the uncommitted write.
    assert_eq!(stm.atomically(|tx| cell.get(tx)).unwrap(), 1);

    writer.abort().unwrap();
    assert_eq!(stm.atomically(|tx| cell.get(tx)).unwrap(), 1);
}

// ============================================================================
// Dirtiness policies (the ABA split)
// ============================================================================

#[test]
fn value_based_bounce_back_is_invisible_to_conflict_detection() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 5u64)).unwrap();
    let version = stm.active_version();

    // Reader pins the current state.
    let mut reader = stm.begin();
    assert_eq!(*reader
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .value(), 5);

    // Bounce the value A -> B -> A in another transaction; under the
    // value-based policy the copy classifies Clean and nothing publishes.
    stm.atomically(|tx| {
        cell.set(tx, 6)?;
        cell.set(tx, 5)
    })
    .unwrap();
    assert_eq!(stm.active_version(), version);

    // The reader can still write and commit: no version moved.
    reader
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(7);
    reader.commit().unwrap();
}

#[test]
fn write_counted_bounce_back_forces_a_conflict() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach_counted(tx, 5u64)).unwrap();
    let version = stm.active_version();

    let mut reader = stm.begin();
    reader
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap();

    // The same bounce now counts as a write and publishes.
    stm.atomically(|tx| {
        cell.set(tx, 6)?;
        cell.set(tx, 5)
    })
    .unwrap();
    assert_eq!(stm.active_version(), version + 1);

    // The pinned reader's write-back must conflict.
    reader
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(7);
    let err = reader.commit().unwrap_err();
    assert!(err.is_conflict());
}

// ============================================================================
// Typed access
// ============================================================================

#[test]
fn refs_round_trip_compound_values() {
    init_tracing();
    let stm = Stm::new();
    let list = stm
        .atomically(|tx| TxRef::attach(tx, vec![1u64, 2, 3]))
        .unwrap();

    stm.atomically(|tx| list.modify(tx, |v| v.push(4))).unwrap();

    let snapshot = stm.atomically(|tx| list.get(tx)).unwrap();
    assert_eq!(snapshot, vec![1, 2, 3, 4]);
}

#[test]
fn statistics_are_monotonic_across_a_workload() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();

    let stats = stm.statistics();
    let committed_before = stats.transactions_committed();
    let loads_before = stats.loads();

    for round in 0..10u64 {
        stm.atomically(|tx| cell.set(tx, round)).unwrap();
    }

    assert!(stats.transactions_committed() >= committed_before + 10);
    assert!(stats.loads() >= loads_before + 10);
}
