//! Commit semantics
//!
//! Version arithmetic, the readonly fast path, and write-conflict
//! detection, both through the typed facade and the raw heap API.

use std::sync::Arc;
use std::thread;

use mvstm::prelude::*;
use mvstm_core::Deflated;
use mvstm_heap::{CommitResult, MultiversionedHeap};

use crate::common::init_tracing;

// ============================================================================
// Version arithmetic
// ============================================================================

#[test]
fn versions_advance_by_one_per_writing_commit() {
    init_tracing();
    let stm = Stm::new();
    let base = stm.active_version();

    let cell = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();
    assert_eq!(stm.active_version(), base + 1);

    for round in 1..=4u64 {
        stm.atomically(|tx| cell.set(tx, round)).unwrap();
        assert_eq!(stm.active_version(), base + 1 + round);
    }
}

#[test]
fn readonly_transactions_never_bump_the_version() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 42u64)).unwrap();
    let version = stm.active_version();

    for _ in 0..3 {
        let value = stm.atomically(|tx| cell.get(tx)).unwrap();
        assert_eq!(value, 42);
    }
    assert_eq!(stm.active_version(), version);
}

#[test]
fn empty_transaction_commit_is_free() {
    init_tracing();
    let stm = Stm::new();
    let version = stm.active_version();

    let mut tx = stm.begin();
    let committed_at = tx.commit().unwrap();

    assert_eq!(committed_at, version);
    assert_eq!(stm.active_version(), version);
}

// ============================================================================
// Write-conflict detection
// ============================================================================

#[test]
fn first_committer_wins_second_conflicts() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();
    let version_before = stm.active_version();

    // T1 starts first but commits second.
    let mut t1 = stm.begin();
    t1.load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(10);

    let mut t2 = stm.begin();
    t2.load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(20);
    t2.commit().unwrap();
    assert_eq!(stm.active_version(), version_before + 1);

    let err = t1.commit().unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(t1.status(), TransactionStatus::Aborted);

    // The loser contributed nothing: version and value are t2's.
    assert_eq!(stm.active_version(), version_before + 1);
    assert_eq!(stm.atomically(|tx| cell.get(tx)).unwrap(), 20);
}

#[test]
fn atomically_reruns_conflicted_bodies_until_they_commit() {
    init_tracing();
    let stm = Stm::new();
    let counter = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();

    let threads = 4;
    let increments = 100u64;
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let stm = stm.clone();
            thread::spawn(move || {
                for _ in 0..increments {
                    stm.atomically(|tx| counter.modify(tx, |n| *n += 1)).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let total = stm.atomically(|tx| counter.get(tx)).unwrap();
    assert_eq!(total, threads as u64 * increments);
}

#[test]
fn disjoint_writes_from_concurrent_threads_both_land() {
    init_tracing();
    let stm = Stm::new();
    let left = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();
    let right = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();

    let writers: Vec<_> = [(left, 1u64), (right, 2u64)]
        .into_iter()
        .map(|(cell, value)| {
            let stm = stm.clone();
            thread::spawn(move || stm.atomically(move |tx| cell.set(tx, value)).unwrap())
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(stm.atomically(|tx| left.get(tx)).unwrap(), 1);
    assert_eq!(stm.atomically(|tx| right.get(tx)).unwrap(), 2);
}

// ============================================================================
// Raw heap scenarios
// ============================================================================

#[test]
fn heap_scenario_stale_start_snapshot_conflicts() {
    init_tracing();
    let heap = MultiversionedHeap::new();
    let handle = Handle::allocate();
    let stale = heap.active_snapshot();

    // Empty heap -> first commit succeeds at version 1.
    match heap.commit(&stale, &[Deflated::new(handle, 1, String::from("foo"))]) {
        CommitResult::Success { snapshot, written } => {
            assert_eq!(snapshot.version(), 1);
            assert_eq!(written, 1);
        }
        other => panic!("expected success, got {other:?}"),
    }

    // Re-using the version-0 snapshot as the start must conflict.
    match heap.commit(&stale, &[Deflated::new(handle, 2, String::from("bar"))]) {
        CommitResult::WriteConflict { handle: conflicted } => assert_eq!(conflicted, handle),
        other => panic!("expected conflict, got {other:?}"),
    }

    assert_eq!(heap.active_version(), 1);
    let active = heap.active_snapshot();
    let deflated = active.read(handle).expect("foo is still there");
    assert_eq!(deflated.version(), 1);
    assert_eq!(
        deflated.downcast::<String>().as_deref(),
        Some(&String::from("foo"))
    );
}

#[test]
fn heap_statistics_observe_commits() {
    init_tracing();
    let heap = Arc::new(MultiversionedHeap::new());
    let handle = Handle::allocate();
    let stats = Arc::clone(heap.statistics());

    let start = heap.active_snapshot();
    let before_success = stats.commits_succeeded();
    let before_conflicts = stats.write_conflicts();

    match heap.commit(&start, &[Deflated::new(handle, 0, 1u64)]) {
        CommitResult::Success { .. } => {}
        other => panic!("seed commit failed: {other:?}"),
    }
    assert_eq!(stats.commits_succeeded(), before_success + 1);

    match heap.commit(&start, &[Deflated::new(handle, 0, 2u64)]) {
        CommitResult::WriteConflict { .. } => {}
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(stats.write_conflicts(), before_conflicts + 1);

    let per_object = stats.object_stats(handle).expect("handle was recorded");
    assert!(per_object.writes >= 1);
    assert!(per_object.conflicts >= 1);
}
