//! # mvstm
//!
//! Multiversioned software transactional memory: coordinated reads and
//! writes on a shared object graph with atomicity, snapshot isolation, and
//! optimistic conflict detection — no locking by the caller.
//!
//! The heap is an immutable, structurally-shared tree of versioned object
//! states published behind a single atomically-swapped reference. A
//! transaction pins the snapshot current at its start, works on private
//! copies, and commits by grafting its dirty copies onto the heap as one
//! new snapshot — provided nothing it wrote was moved by a concurrent
//! commit in the meantime.
//!
//! ## Quick Start
//!
//! ```
//! use mvstm::prelude::*;
//!
//! let stm = Stm::new();
//!
//! // Publish a counter.
//! let counter = stm.atomically(|tx| TxRef::attach(tx, 0u64))?;
//!
//! // Increment it transactionally.
//! stm.atomically(|tx| counter.modify(tx, |n| *n += 1))?;
//!
//! assert_eq!(stm.atomically(|tx| counter.get(tx))?, 1);
//! # Ok::<(), mvstm::Error>(())
//! ```
//!
//! ## Blocking retry
//!
//! A transaction that cannot proceed (say, a consumer finding a queue
//! empty) calls [`retry`]: the runner registers a wakeup on everything the
//! transaction read, blocks until one of those objects changes, and runs
//! the body again against a fresh snapshot.
//!
//! ```ignore
//! let item = stm.atomically(|tx| {
//!     let mut items = queue.get(tx)?;
//!     match items.pop() {
//!         Some(item) => {
//!             queue.set(tx, items)?;
//!             Ok(item)
//!         }
//!         None => retry(),
//!     }
//! })?;
//! ```
//!
//! ## Layers
//!
//! - [`mvstm_heap`]: the shared multiversioned heap (lock-free, CAS-published)
//! - [`mvstm_txn`]: the per-thread transaction state machine
//! - this crate: typed references and the `atomically` runner

#![warn(missing_docs)]

mod refs;
mod runtime;

pub mod prelude;

// Main entry points
pub use refs::TxRef;
pub use runtime::{retry, Stm};

// Error handling
pub use mvstm_core::{Result, StmError, StmError as Error};

// Core vocabulary
pub use mvstm_core::{DirtinessPolicy, Handle, ObjectStats, StmStatistics, Transactable};

// Transaction layer
pub use mvstm_txn::{Transaction, TransactionStatus};
