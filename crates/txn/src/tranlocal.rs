//! Working copies
//!
//! A tranlocal is the mutable, transaction-private representation of one
//! object: created by privatizing a deflated heap value (or attached fresh
//! for a brand-new object), mutated freely by the owning transaction, and
//! deflated back into the heap on commit. It never outlives its
//! transaction and is never shared between threads.

use std::any::Any;
use std::sync::Arc;

use mvstm_core::{Deflated, DirtinessPolicy, Handle, Transactable};

/// Classification of a working copy relative to its origin.
///
/// `Fresh` and `Dirty` copies form the write-set; `Clean` and `Committed`
/// copies are skipped at commit time, which is what makes a read-only
/// transaction free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyStatus {
    /// Brand new; no origin exists in the heap.
    Fresh,
    /// Loaded from the heap and not (observably) changed.
    Clean,
    /// Loaded from the heap and changed.
    Dirty,
    /// Already flushed by this transaction's commit.
    Committed,
}

impl DirtyStatus {
    /// Must this copy be written back on commit?
    pub fn needs_write(self) -> bool {
        matches!(self, DirtyStatus::Fresh | DirtyStatus::Dirty)
    }
}

/// Object-safe view of a working copy, as stored in a transaction's
/// working set.
pub trait Tranlocal: 'static {
    /// Handle of the object this copy belongs to.
    fn handle(&self) -> Handle;

    /// Classify this copy against its origin.
    fn status(&self) -> DirtyStatus;

    /// Was this copy privatized from the heap (as opposed to attached
    /// fresh)? Only heap-resident objects can wake a blocked retry.
    fn loaded_from_heap(&self) -> bool;

    /// Freeze the current state for publication and mark the copy
    /// `Committed`. The heap stamps the real commit version during the
    /// publication fold; the version on the returned value is provisional.
    fn deflate(&mut self) -> Deflated;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Working copy of a `T`.
///
/// Tracks the origin it was privatized from (shared with the heap, never
/// mutated), the live value, and a write counter. How the write counter
/// and the value comparison combine into a dirtiness verdict is decided by
/// the reference's [`DirtinessPolicy`].
#[derive(Debug)]
pub struct TypedTranlocal<T: Transactable> {
    handle: Handle,
    origin: Option<Arc<T>>,
    origin_version: u64,
    value: T,
    writes: u64,
    committed: bool,
    policy: DirtinessPolicy,
}

impl<T: Transactable> TypedTranlocal<T> {
    /// A working copy for a brand-new object that exists nowhere else.
    pub fn fresh(handle: Handle, value: T, policy: DirtinessPolicy) -> Self {
        TypedTranlocal {
            handle,
            origin: None,
            origin_version: 0,
            value,
            writes: 0,
            committed: false,
            policy,
        }
    }

    /// Privatize a heap-resident state into a working copy.
    pub fn privatized(
        handle: Handle,
        origin: Arc<T>,
        origin_version: u64,
        policy: DirtinessPolicy,
    ) -> Self {
        let value = origin.snapshot();
        TypedTranlocal {
            handle,
            origin: Some(origin),
            origin_version,
            value,
            writes: 0,
            committed: false,
            policy,
        }
    }

    /// Version of the origin this copy was privatized from.
    pub fn origin_version(&self) -> u64 {
        self.origin_version
    }

    /// The dirtiness policy this copy was created with.
    pub fn policy(&self) -> DirtinessPolicy {
        self.policy
    }

    /// Read access to the working value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Replace the working value. Counts as a write.
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.writes += 1;
    }

    /// Mutate the working value in place. Counts as a write.
    pub fn modify(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.value);
        self.writes += 1;
    }

    /// Mutable access to the working value. Counts as a write, since the
    /// caller can change anything through it.
    pub fn value_mut(&mut self) -> &mut T {
        self.writes += 1;
        &mut self.value
    }
}

impl<T: Transactable> Tranlocal for TypedTranlocal<T> {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn status(&self) -> DirtyStatus {
        if self.committed {
            return DirtyStatus::Committed;
        }
        match &self.origin {
            None => DirtyStatus::Fresh,
            Some(origin) => {
                let dirty = match self.policy {
                    DirtinessPolicy::WriteCounted => self.writes > 0,
                    DirtinessPolicy::ValueBased => self.value.is_dirty(origin),
                };
                if dirty {
                    DirtyStatus::Dirty
                } else {
                    DirtyStatus::Clean
                }
            }
        }
    }

    fn loaded_from_heap(&self) -> bool {
        self.origin.is_some()
    }

    fn deflate(&mut self) -> Deflated {
        let frozen = Arc::new(self.value.snapshot());
        self.origin = Some(frozen.clone());
        self.committed = true;
        self.writes = 0;
        Deflated::from_payload(self.handle, self.origin_version, frozen)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
