//! Runtime statistics
//!
//! Monotonically increasing counters shared by the heap and every
//! transaction. The counters are strictly observational: nothing in the
//! runtime reads them back to make a decision.
//!
//! Aggregate counters are plain relaxed `AtomicU64`s; per-object write and
//! conflict counts live in a `DashMap` keyed by handle so that hot objects
//! can be identified without a global lock.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::handle::Handle;

#[derive(Default)]
struct ObjectCounters {
    writes: AtomicU64,
    conflicts: AtomicU64,
}

/// Point-in-time view of one object's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStats {
    /// Committed writes that touched this object.
    pub writes: u64,
    /// Write conflicts detected on this object.
    pub conflicts: u64,
}

/// Counters for the whole runtime.
///
/// All increments use relaxed ordering: the counters order nothing and
/// guard nothing.
#[derive(Default)]
pub struct StmStatistics {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    transactions_retried: AtomicU64,
    commits_attempted: AtomicU64,
    commits_readonly: AtomicU64,
    commits_succeeded: AtomicU64,
    write_conflicts: AtomicU64,
    lock_failures: AtomicU64,
    loads: AtomicU64,
    attaches: AtomicU64,
    listeners_registered: AtomicU64,
    latches_opened: AtomicU64,
    publication_races: AtomicU64,
    per_object: DashMap<Handle, ObjectCounters>,
}

macro_rules! counter {
    ($(#[$doc:meta])* $record:ident, $get:ident, $field:ident) => {
        $(#[$doc])*
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        /// Current value of the counter.
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl StmStatistics {
    /// Fresh statistics with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(
        /// A transaction entered the Active state (fresh or via reset).
        record_transaction_started, transactions_started, transactions_started
    );
    counter!(
        /// A transaction committed (readonly or writing).
        record_transaction_committed, transactions_committed, transactions_committed
    );
    counter!(
        /// A transaction aborted, explicitly or on a failed commit.
        record_transaction_aborted, transactions_aborted, transactions_aborted
    );
    counter!(
        /// A transaction blocked for retry.
        record_transaction_retried, transactions_retried, transactions_retried
    );
    counter!(
        /// A write batch was handed to the heap.
        record_commit_attempted, commits_attempted, commits_attempted
    );
    counter!(
        /// A commit completed without touching the heap.
        record_commit_readonly, commits_readonly, commits_readonly
    );
    counter!(
        /// A write batch was published.
        record_commit_succeeded, commits_succeeded, commits_succeeded
    );
    counter!(
        /// A write batch was rejected with a write conflict.
        record_write_conflict, write_conflicts, write_conflicts
    );
    counter!(
        /// Commit lock acquisition was refused.
        record_lock_failure, lock_failures, lock_failures
    );
    counter!(
        /// A transaction loaded (or re-loaded) an object.
        record_load, loads, loads
    );
    counter!(
        /// A brand-new object was attached to a transaction.
        record_attach, attaches, attaches
    );
    counter!(
        /// A retry latch was registered on a block.
        record_listener_registered, listeners_registered, listeners_registered
    );
    counter!(
        /// A retry latch was opened.
        record_latch_opened, latches_opened, latches_opened
    );
    counter!(
        /// A publication CAS lost to a concurrent commit and was retried.
        record_publication_race, publication_races, publication_races
    );

    /// A committed write touched `handle`.
    pub fn record_object_write(&self, handle: Handle) {
        self.per_object
            .entry(handle)
            .or_default()
            .writes
            .fetch_add(1, Ordering::Relaxed);
    }

    /// A write conflict was detected on `handle`.
    pub fn record_object_conflict(&self, handle: Handle) {
        self.per_object
            .entry(handle)
            .or_default()
            .conflicts
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Per-object counters for `handle`, if it was ever recorded.
    pub fn object_stats(&self, handle: Handle) -> Option<ObjectStats> {
        self.per_object.get(&handle).map(|counters| ObjectStats {
            writes: counters.writes.load(Ordering::Relaxed),
            conflicts: counters.conflicts.load(Ordering::Relaxed),
        })
    }
}

impl std::fmt::Debug for StmStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StmStatistics")
            .field("transactions_started", &self.transactions_started())
            .field("transactions_committed", &self.transactions_committed())
            .field("transactions_aborted", &self.transactions_aborted())
            .field("transactions_retried", &self.transactions_retried())
            .field("commits_attempted", &self.commits_attempted())
            .field("commits_readonly", &self.commits_readonly())
            .field("commits_succeeded", &self.commits_succeeded())
            .field("write_conflicts", &self.write_conflicts())
            .field("lock_failures", &self.lock_failures())
            .field("loads", &self.loads())
            .field("attaches", &self.attaches())
            .field("listeners_registered", &self.listeners_registered())
            .field("latches_opened", &self.latches_opened())
            .field("publication_races", &self.publication_races())
            .finish_non_exhaustive()
    }
}
