//! Transaction layer for the mvstm runtime
//!
//! This crate implements the per-thread half of the STM:
//! - [`Tranlocal`] / [`TypedTranlocal`]: privatized working copies with
//!   Fresh/Clean/Dirty/Committed classification
//! - [`Transaction`]: the state machine driving load, attach, commit,
//!   abort, and blocking retry against the multiversioned heap
//! - [`CommitLockPolicy`]: which pessimistic locks a commit takes
//!
//! A transaction is confined to the thread that created it; the type is
//! deliberately neither `Send` nor `Sync`, so confinement is enforced by
//! the compiler rather than by a runtime check.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locks;
pub mod tranlocal;
pub mod transaction;

pub use locks::{CommitLockPolicy, ExclusiveCommitLocks, OptimisticOnly};
pub use tranlocal::{DirtyStatus, Tranlocal, TypedTranlocal};
pub use transaction::{Transaction, TransactionStatus};
