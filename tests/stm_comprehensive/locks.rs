//! The optional pessimistic layer
//!
//! Per-object locks sit on top of optimistic conflict detection: loads
//! respect exclusive locks, commit acquisition is all-or-nothing, and the
//! failure path leaves no lock behind.

use std::sync::Arc;

use mvstm::prelude::*;
use mvstm_heap::LockMode;
use mvstm_txn::OptimisticOnly;

use crate::common::init_tracing;

#[test]
fn exclusive_lock_blocks_foreign_loads() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();

    let holder = stm.begin();
    stm.heap()
        .lock_all(holder.id(), LockMode::Exclusive, &[cell.handle()])
        .unwrap();

    let mut other = stm.begin();
    let err = other
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap_err();
    assert_eq!(err, StmError::LoadLocked { handle: cell.handle() });
    assert_eq!(other.status(), TransactionStatus::Active);

    // The holder itself may still load.
    let mut holder = holder;
    assert_eq!(
        *holder
            .load_typed::<u64>(cell.handle(), cell.policy())
            .unwrap()
            .value(),
        1
    );

    stm.heap().unlock_all(holder.id(), &[cell.handle()]);
    assert!(other
        .load_typed::<u64>(cell.handle(), cell.policy())
        .is_ok());
}

#[test]
fn shared_lock_permits_foreign_loads() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();

    let holder = stm.begin();
    stm.heap()
        .lock_all(holder.id(), LockMode::Shared, &[cell.handle()])
        .unwrap();

    let mut other = stm.begin();
    assert!(other
        .load_typed::<u64>(cell.handle(), cell.policy())
        .is_ok());

    stm.heap().unlock_all(holder.id(), &[cell.handle()]);
}

#[test]
fn commit_against_a_foreign_lock_fails_without_leaking() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();
    let version = stm.active_version();

    // Load first, so the lock arrives after privatization.
    let mut writer = stm.begin();
    writer
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(2);

    let holder = stm.begin();
    stm.heap()
        .lock_all(holder.id(), LockMode::Exclusive, &[cell.handle()])
        .unwrap();

    let err = writer.commit().unwrap_err();
    assert_eq!(
        err,
        StmError::FailedToObtainLocks { handle: cell.handle() }
    );
    assert_eq!(writer.status(), TransactionStatus::Aborted);
    assert_eq!(stm.active_version(), version);

    // The holder's lock is intact; the failed commit added nothing.
    let lock = stm
        .heap()
        .active_snapshot()
        .block(cell.handle())
        .unwrap()
        .lock()
        .unwrap();
    assert_eq!(lock.owner, holder.id());

    // Release and confirm a clean commit goes through.
    stm.heap().unlock_all(holder.id(), &[cell.handle()]);
    stm.atomically(|tx| cell.set(tx, 3)).unwrap();
    assert_eq!(stm.atomically(|tx| cell.get(tx)).unwrap(), 3);
}

#[test]
fn successful_commit_releases_its_own_locks() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();

    stm.atomically(|tx| cell.set(tx, 2)).unwrap();

    // The committed block carries no lock residue.
    let snapshot = stm.heap().active_snapshot();
    assert_eq!(snapshot.block(cell.handle()).unwrap().lock(), None);
}

#[test]
fn optimistic_policy_skips_pessimistic_locking() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();

    // A shared lock held by someone else refuses exclusive commit locks,
    // but a purely optimistic commit does not ask for any.
    let holder = stm.begin();
    stm.heap()
        .lock_all(holder.id(), LockMode::Shared, &[cell.handle()])
        .unwrap();

    let mut writer = stm.begin();
    writer.set_lock_policy(OptimisticOnly);
    writer
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(2);
    writer.commit().unwrap();

    assert_eq!(stm.atomically(|tx| cell.get(tx)).unwrap(), 2);
    drop(holder);
}

#[test]
fn lock_failure_surfaces_through_statistics() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 1u64)).unwrap();
    let stats = Arc::clone(stm.statistics());
    let failures_before = stats.lock_failures();

    // Privatize before the foreign lock lands, then fail the commit.
    let mut writer = stm.begin();
    writer
        .load_typed::<u64>(cell.handle(), cell.policy())
        .unwrap()
        .set(2);

    let holder = stm.begin();
    stm.heap()
        .lock_all(holder.id(), LockMode::Exclusive, &[cell.handle()])
        .unwrap();

    writer.commit().unwrap_err();
    assert_eq!(stats.lock_failures(), failures_before + 1);

    stm.heap().unlock_all(holder.id(), &[cell.handle()]);
}
