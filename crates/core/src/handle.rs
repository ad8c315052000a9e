//! Object and transaction identity
//!
//! Both identifiers are plain 64-bit values handed out by process-wide
//! monotonic counters. Zero is reserved as "no object" / "no transaction"
//! and is rejected at the `from_raw` boundary, so a stored identifier is
//! valid by construction.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one logical object's slot in the heap.
///
/// Unique per logically-distinct object for the lifetime of the process.
/// Handles are totally ordered, which is what the heap's search tree keys on.
///
/// # Examples
///
/// ```
/// use mvstm_core::Handle;
///
/// let a = Handle::allocate();
/// let b = Handle::allocate();
/// assert_ne!(a, b);
/// assert!(Handle::from_raw(0).is_none()); // zero is reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Allocate a fresh, process-wide unique handle.
    pub fn allocate() -> Self {
        Handle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Reconstruct a handle from its raw value.
    ///
    /// Returns `None` for zero, the reserved "no object" value.
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Handle(raw))
        }
    }

    /// Raw numeric value of this handle.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one transaction, used as the owner of pessimistic locks.
///
/// Allocated per logical transaction; a `reset` transaction gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(u64);

impl TxnId {
    /// Allocate a fresh, process-wide unique transaction id.
    pub fn allocate() -> Self {
        TxnId(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of this id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
