//! Blocking retry
//!
//! A blocked transaction must not wake while its read-set is unmodified,
//! must wake after a covering commit, and must refuse to block when there
//! is nothing that could ever wake it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mvstm::prelude::*;

use crate::common::init_tracing;

#[test]
fn retry_with_nothing_read_fails_fast() {
    init_tracing();
    let stm = Stm::new();

    let mut tx = stm.begin();
    let err = tx.abort_and_retry().unwrap_err();
    assert_eq!(err, StmError::NoProgressPossible);
    assert_eq!(tx.status(), TransactionStatus::Active);
}

#[test]
fn blocked_transaction_stays_blocked_while_unmodified() {
    init_tracing();
    let stm = Stm::new();
    let watched = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();
    let unrelated = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();

    let woke = Arc::new(AtomicBool::new(false));
    let (pinned_tx, pinned_rx) = std::sync::mpsc::channel();
    let waiter = {
        let stm = stm.clone();
        let woke = Arc::clone(&woke);
        thread::spawn(move || {
            let mut tx = stm.begin();
            tx.load_typed::<u64>(watched.handle(), watched.policy())
                .unwrap();
            pinned_tx.send(()).unwrap();
            tx.abort_and_retry().unwrap();
            woke.store(true, Ordering::Release);
        })
    };

    // Wait for the read-set to be pinned, then commit something the
    // waiter did not read.
    pinned_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    stm.atomically(|tx| unrelated.set(tx, 1)).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!woke.load(Ordering::Acquire), "woke without a covering commit");

    // A commit on the watched object releases it.
    stm.atomically(|tx| watched.set(tx, 1)).unwrap();
    waiter.join().unwrap();
    assert!(woke.load(Ordering::Acquire));
}

#[test]
fn woken_transaction_observes_the_new_state() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();

    let (pinned_tx, pinned_rx) = std::sync::mpsc::channel();
    let waiter = {
        let stm = stm.clone();
        thread::spawn(move || {
            let mut tx = stm.begin();
            let before = tx.read_version();
            tx.load_typed::<u64>(cell.handle(), cell.policy()).unwrap();
            pinned_tx.send(()).unwrap();
            tx.abort_and_retry().unwrap();

            // Back to Active at a strictly newer read version, seeing the
            // write that woke it.
            assert_eq!(tx.status(), TransactionStatus::Active);
            assert!(tx.read_version() > before);
            *tx.load_typed::<u64>(cell.handle(), cell.policy())
                .unwrap()
                .value()
        })
    };

    pinned_rx.recv().unwrap();
    stm.atomically(|tx| cell.set(tx, 7)).unwrap();
    assert_eq!(waiter.join().unwrap(), 7);
}

#[test]
fn retry_helper_blocks_until_a_producer_delivers() {
    init_tracing();
    let stm = Stm::new();
    let queue = stm
        .atomically(|tx| TxRef::attach(tx, Vec::<u64>::new()))
        .unwrap();

    let consumer = {
        let stm = stm.clone();
        thread::spawn(move || {
            stm.atomically(|tx| {
                let mut items = queue.get(tx)?;
                match items.pop() {
                    Some(item) => {
                        queue.set(tx, items)?;
                        Ok(item)
                    }
                    None => retry(),
                }
            })
            .unwrap()
        })
    };

    thread::sleep(Duration::from_millis(30));
    stm.atomically(|tx| queue.modify(tx, |items| items.push(42)))
        .unwrap();

    assert_eq!(consumer.join().unwrap(), 42);
    let drained = stm.atomically(|tx| queue.get(tx)).unwrap();
    assert!(drained.is_empty());
}

#[test]
fn wakeup_arrives_even_when_the_commit_races_registration() {
    init_tracing();
    let stm = Stm::new();
    let cell = stm.atomically(|tx| TxRef::attach(tx, 0u64)).unwrap();

    // The waiter signals once its snapshot is pinned; the covering commit
    // then races the latch registration itself. Whether the commit lands
    // before or after the latch goes in, the waiter must come back: a
    // pre-registration commit is caught by the already-happened check,
    // a post-registration one by the latch.
    let (pinned_tx, pinned_rx) = std::sync::mpsc::channel();
    let waiter = {
        let stm = stm.clone();
        thread::spawn(move || {
            let mut tx = stm.begin();
            tx.load_typed::<u64>(cell.handle(), cell.policy()).unwrap();
            pinned_tx.send(()).unwrap();
            tx.abort_and_retry().unwrap();
        })
    };

    pinned_rx.recv().unwrap();
    stm.atomically(|tx| cell.set(tx, 1)).unwrap();
    waiter.join().unwrap();
}
