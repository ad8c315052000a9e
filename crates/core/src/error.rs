//! Typed failure taxonomy for the STM runtime
//!
//! Every failure kind is a distinct variant so that callers (or generated
//! instrumentation) can implement retry-vs-abort-vs-propagate policies per
//! kind rather than pattern-matching on message strings.
//!
//! The taxonomy splits into:
//! - programming-contract violations (`Panic`, `DeadTransaction`,
//!   `NoProgressPossible`, `WrongType`) — bugs in calling code, never
//!   recovered silently
//! - expected concurrency outcomes (`WriteConflict`) — the transaction
//!   aborts; the caller decides whether to run again
//! - lock contention (`LoadLocked`, `FailedToObtainLocks`) — transient,
//!   usually worth retrying
//! - stale or absent data (`LoadUncommitted`, `LoadTooOld`, `NoSuchObject`)
//!   — the transaction stays active; the caller may take an alternate path

use thiserror::Error;

use crate::handle::Handle;

/// All STM runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StmError {
    /// Operation attempted on a committed or aborted transaction.
    #[error("transaction is {status} and cannot accept new work")]
    DeadTransaction {
        /// The terminal status the transaction was found in.
        status: &'static str,
    },

    /// Another transaction committed the object past this transaction's
    /// read version.
    #[error("write conflict on handle {handle}")]
    WriteConflict {
        /// Handle of the object that conflicted.
        handle: Handle,
    },

    /// A commit lock on a write-set member is held by another transaction.
    #[error("failed to obtain commit lock on handle {handle}")]
    FailedToObtainLocks {
        /// Handle of the object whose lock was refused.
        handle: Handle,
    },

    /// Retry was requested without anything to wait on.
    ///
    /// A transaction that read nothing from the heap can never be woken by
    /// another commit, so blocking it would deadlock the thread.
    #[error("retry without tracked reads can never make progress")]
    NoProgressPossible,

    /// The object has never been committed to the heap.
    #[error("object {handle} has never been committed")]
    LoadUncommitted {
        /// Handle of the absent object.
        handle: Handle,
    },

    /// The requested heap version has been pruned from the snapshot chain.
    #[error("version {requested} is no longer retained (earliest is {earliest})")]
    LoadTooOld {
        /// The version that was asked for.
        requested: u64,
        /// The oldest version still reachable.
        earliest: u64,
    },

    /// The object is exclusively locked by another transaction.
    #[error("object {handle} is locked by a conflicting transaction")]
    LoadLocked {
        /// Handle of the locked object.
        handle: Handle,
    },

    /// No object exists at the given handle.
    #[error("no object at handle {handle}")]
    NoSuchObject {
        /// The unknown handle.
        handle: Handle,
    },

    /// The heap payload at this handle is not of the requested type.
    #[error("wrong payload type for handle {handle}")]
    WrongType {
        /// Handle of the mistyped object.
        handle: Handle,
    },

    /// Internal invariant violation; a bug in calling code or in the
    /// runtime itself, never a recoverable condition.
    #[error("internal invariant violated: {0}")]
    Panic(String),

    /// Explicit retry request from a transaction body.
    ///
    /// Consumed by the `atomically` runner (which turns it into a blocking
    /// retry); callers of `atomically` never observe it.
    #[error("retry requested")]
    Retry,
}

/// Result type for STM operations.
pub type Result<T> = std::result::Result<T, StmError>;

impl StmError {
    /// Is this an optimistic-concurrency conflict?
    pub fn is_conflict(&self) -> bool {
        matches!(self, StmError::WriteConflict { .. })
    }

    /// May running the transaction again with fresh data succeed?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StmError::WriteConflict { .. }
                | StmError::FailedToObtainLocks { .. }
                | StmError::LoadLocked { .. }
        )
    }

    /// Does this indicate a bug in calling code rather than a runtime
    /// condition?
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            StmError::Panic(_)
                | StmError::DeadTransaction { .. }
                | StmError::NoProgressPossible
                | StmError::WrongType { .. }
        )
    }

    /// Did a load fail while the transaction itself stayed active?
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            StmError::LoadUncommitted { .. }
                | StmError::LoadTooOld { .. }
                | StmError::LoadLocked { .. }
                | StmError::NoSuchObject { .. }
        )
    }
}
