//! Core types for the mvstm runtime
//!
//! This crate defines the fundamental vocabulary shared by the heap and
//! transaction layers:
//! - [`Handle`]: opaque identity of one logical object's heap slot
//! - [`TxnId`]: transaction identity, used as pessimistic lock owner
//! - [`Deflated`]: the immutable, versioned form of an object's state
//! - [`Transactable`]: per-type dirtiness and snapshot-clone dispatch
//! - [`StmError`]: the full typed failure taxonomy
//! - [`StmStatistics`]: observability counters (never consulted by control flow)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deflated;
pub mod error;
pub mod handle;
pub mod stats;
pub mod transactable;

pub use deflated::{Deflated, Payload};
pub use error::{Result, StmError};
pub use handle::{Handle, TxnId};
pub use stats::{ObjectStats, StmStatistics};
pub use transactable::{DirtinessPolicy, Transactable};
