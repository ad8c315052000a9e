//! The STM runtime entry point
//!
//! [`Stm`] owns the shared heap and hands out transactions. Most callers
//! never touch a [`Transaction`] directly and instead run closures through
//! [`Stm::atomically`], which encapsulates the restart policy: conflicts
//! run the body again, an explicit [`retry`] blocks until something the
//! body read changes, and everything else propagates to the caller.

use std::sync::Arc;

use tracing::trace;

use mvstm_core::{Result, StmError, StmStatistics};
use mvstm_heap::MultiversionedHeap;
use mvstm_txn::Transaction;

/// Ask the `atomically` runner to block until one of the objects the
/// transaction has read changes, then run the body again.
///
/// # Examples
///
/// ```
/// use mvstm::prelude::*;
///
/// fn pop_or_block(stm: &Stm, queue: TxRef<Vec<u64>>) -> Result<u64> {
///     stm.atomically(|tx| {
///         let mut items = queue.get(tx)?;
///         match items.pop() {
///             Some(item) => {
///                 queue.set(tx, items)?;
///                 Ok(item)
///             }
///             None => retry(),
///         }
///     })
/// }
/// ```
pub fn retry<T>() -> Result<T> {
    Err(StmError::Retry)
}

/// The STM runtime: a shared multiversioned heap plus the transaction
/// factory over it.
///
/// Cheap to clone; clones share the same heap.
#[derive(Clone)]
pub struct Stm {
    heap: Arc<MultiversionedHeap>,
}

impl Stm {
    /// A fresh runtime with an empty heap at version 0.
    pub fn new() -> Self {
        Stm {
            heap: Arc::new(MultiversionedHeap::new()),
        }
    }

    /// A fresh runtime retaining up to `depth` recent snapshots for
    /// stale-pinned transactions.
    pub fn with_chain_depth(depth: usize) -> Self {
        Stm {
            heap: Arc::new(MultiversionedHeap::with_chain_depth(depth)),
        }
    }

    /// The underlying heap.
    pub fn heap(&self) -> &Arc<MultiversionedHeap> {
        &self.heap
    }

    /// Version of the currently published snapshot.
    pub fn active_version(&self) -> u64 {
        self.heap.active_version()
    }

    /// Shared statistics counters.
    pub fn statistics(&self) -> &Arc<StmStatistics> {
        self.heap.statistics()
    }

    /// Begin a transaction at the heap's current version.
    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.heap))
    }

    /// Begin a transaction pinned to `version`, if still retained.
    pub fn begin_at(&self, version: u64) -> Result<Transaction> {
        Transaction::new_at(Arc::clone(&self.heap), version)
    }

    /// Run `body` in a transaction until it commits.
    ///
    /// - `Ok` + successful commit: the value is returned.
    /// - A conflict (write conflict or lock contention), from the body or
    ///   from the commit: the transaction restarts at a fresh snapshot and
    ///   the body runs again.
    /// - [`retry`]: the transaction blocks until one of the objects it
    ///   read changes, then the body runs again.
    /// - Any other error: the transaction aborts and the error propagates.
    ///
    /// The body may run any number of times, so it must be free of side
    /// effects other than through the transaction.
    pub fn atomically<T, F>(&self, body: F) -> Result<T>
    where
        F: Fn(&mut Transaction) -> Result<T>,
    {
        let mut tx = self.begin();
        loop {
            match body(&mut tx) {
                Ok(value) => match tx.commit() {
                    Ok(_) => return Ok(value),
                    Err(err) if err.is_retryable() => {
                        trace!(
                            target: "mvstm::runtime",
                            error = %err,
                            "atomically_restart_after_commit_failure"
                        );
                        tx.reset();
                    }
                    Err(err) => return Err(err),
                },
                Err(StmError::Retry) => {
                    tx.abort_and_retry()?;
                }
                Err(err) if err.is_retryable() => {
                    trace!(
                        target: "mvstm::runtime",
                        error = %err,
                        "atomically_restart_after_body_failure"
                    );
                    let _ = tx.abort();
                    tx.reset();
                }
                Err(err) => {
                    let _ = tx.abort();
                    return Err(err);
                }
            }
        }
    }
}

impl Default for Stm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Stm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stm")
            .field("active_version", &self.active_version())
            .finish()
    }
}
