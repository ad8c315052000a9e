//! Immutable per-object heap cell
//!
//! A [`Block`] ties together one object's current deflated state, its
//! optional pessimistic lock, and the chain of retry latches waiting for
//! the object to change. Blocks are values: every mutation produces a new
//! block and leaves the old one untouched, which is what lets whole
//! snapshots share them freely.

use std::sync::Arc;

use smallvec::SmallVec;

use mvstm_core::{Deflated, Handle, TxnId};

use crate::latch::Latch;

/// Pessimistic lock modes.
///
/// A shared lock permits loads by other transactions; an exclusive lock
/// refuses them. Neither replaces version-based conflict detection at
/// commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Other transactions may still load the object.
    Shared,
    /// Loads and lock requests by other transactions are refused.
    Exclusive,
}

/// An owned pessimistic lock. Absence of a `LockState` means the block is
/// free, so "owner present iff locked" holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    /// Transaction holding the lock.
    pub owner: TxnId,
    /// Mode the lock is held in.
    pub mode: LockMode,
}

/// Latches drained from a block during an update, to be opened after the
/// new snapshot is published.
pub type WokenLatches = SmallVec<[Arc<Latch>; 4]>;

struct ListenerNode {
    latch: Arc<Latch>,
    next: Option<Arc<ListenerNode>>,
}

/// Immutable cell for one object: deflated state, lock state, listeners.
#[derive(Clone)]
pub struct Block {
    deflated: Deflated,
    lock: Option<LockState>,
    listeners: Option<Arc<ListenerNode>>,
}

impl Block {
    /// A fresh, lock-free, listener-free block around `deflated`.
    pub fn new(deflated: Deflated) -> Self {
        Block {
            deflated,
            lock: None,
            listeners: None,
        }
    }

    /// Handle of the object this block belongs to.
    pub fn handle(&self) -> Handle {
        self.deflated.handle()
    }

    /// Version of the deflated state held here.
    pub fn version(&self) -> u64 {
        self.deflated.version()
    }

    /// The deflated state held here.
    pub fn deflated(&self) -> &Deflated {
        &self.deflated
    }

    /// Current lock state, `None` when free.
    pub fn lock(&self) -> Option<LockState> {
        self.lock
    }

    /// Replace this block's state with `deflated`, subject to the write
    /// conflict threshold.
    ///
    /// Fails (`None`) when the current state is newer than
    /// `start_version`: a commit that slipped in between the caller's read
    /// and this update already advanced the object, and publishing over it
    /// would lose that write.
    ///
    /// On success the pending listener chain is drained into `woken`. The
    /// caller must open those latches only after the snapshot containing
    /// the new block is published; opening earlier would let a waiter
    /// observe a version that is not yet visible. The returned block is
    /// lock-free and listener-free.
    pub fn with_update(
        &self,
        deflated: Deflated,
        start_version: u64,
        woken: &mut WokenLatches,
    ) -> Option<Block> {
        if self.deflated.version() > start_version {
            return None;
        }
        let mut cursor = self.listeners.clone();
        while let Some(node) = cursor {
            woken.push(node.latch.clone());
            cursor = node.next.clone();
        }
        Some(Block::new(deflated))
    }

    /// Cons `latch` onto this block's listener chain.
    ///
    /// Returns `None` when the latch is already open: there is nothing to
    /// wait for, and the caller should keep the existing tree rather than
    /// copy a path for no effect.
    pub fn with_added_listener(&self, latch: &Arc<Latch>) -> Option<Block> {
        if latch.is_open() {
            return None;
        }
        Some(Block {
            deflated: self.deflated.clone(),
            lock: self.lock,
            listeners: Some(Arc::new(ListenerNode {
                latch: Arc::clone(latch),
                next: self.listeners.clone(),
            })),
        })
    }

    /// Apply a lock transition.
    ///
    /// `None` as the request releases the lock and always succeeds. An
    /// acquire succeeds when the block is free or when the requesting
    /// owner already holds the lock (mode change); a request against a
    /// lock held by a different owner is refused (`None` result).
    pub fn with_lock(&self, request: Option<LockState>) -> Option<Block> {
        let granted = match (self.lock, request) {
            (_, None) => None,
            (None, Some(requested)) => Some(requested),
            (Some(held), Some(requested)) if held.owner == requested.owner => Some(requested),
            (Some(_), Some(_)) => return None,
        };
        Some(Block {
            deflated: self.deflated.clone(),
            lock: granted,
            listeners: self.listeners.clone(),
        })
    }

    /// Number of latches currently chained on this block.
    pub fn listener_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.listeners.as_ref();
        while let Some(node) = cursor {
            count += 1;
            cursor = node.next.as_ref();
        }
        count
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("handle", &self.handle())
            .field("version", &self.version())
            .field("lock", &self.lock)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
