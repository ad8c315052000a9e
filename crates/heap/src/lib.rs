//! Multiversioned heap for the mvstm runtime
//!
//! This crate implements the shared half of the STM: an immutable,
//! structurally-shared search tree of object states, published behind a
//! single atomically-swapped reference. Everything here is lock-free;
//! contention is resolved by rebuilding against the freshest snapshot and
//! retrying the publication CAS, never by blocking.
//!
//! - [`Latch`]: single-use wakeup gate backing blocking retry
//! - [`Block`]: immutable per-object cell (state, lock, pending listeners)
//! - [`VersionedNode`]: persistent AVL tree keyed by handle
//! - [`Snapshot`] / [`SnapshotChain`]: immutable whole-heap views and the
//!   bounded history kept for stale-pinned readers
//! - [`MultiversionedHeap`]: the coordination point exposing `commit` and
//!   `listen`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod heap;
pub mod latch;
pub mod snapshot;
pub mod tree;

pub use block::{Block, LockMode, LockState, WokenLatches};
pub use heap::{CommitResult, MultiversionedHeap, DEFAULT_CHAIN_DEPTH};
pub use latch::Latch;
pub use snapshot::{Snapshot, SnapshotChain};
pub use tree::{ListenOutcome, LockOutcome, VersionedNode, WriteConflict};
