//! Persistent AVL tree of blocks
//!
//! The heap's index: an immutable binary search tree keyed by handle, one
//! [`Block`] per node. Updates are copy-on-write — the path from the root
//! to the touched node is rebuilt, everything else is shared with the
//! previous tree — so a published snapshot is never invalidated by later
//! writes.
//!
//! Rebalancing is classic AVL: heights are memoized at node construction,
//! and a single or double rotation is chosen on the way back up whenever a
//! subtree's balance factor leaves {-1, 0, 1}.

use std::cmp::Ordering;
use std::sync::Arc;

use mvstm_core::{Deflated, Handle};

use crate::block::{Block, LockState, WokenLatches};
use crate::latch::Latch;

/// Marker for a failed `write_at`: the existing state is newer than the
/// writer's conflict threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConflict;

/// Result of registering a retry latch on a handle.
pub enum ListenOutcome {
    /// New root with the latch chained onto the handle's block.
    Registered(Arc<VersionedNode>),
    /// The latch is already open; the tree is unchanged.
    AlreadyOpen,
    /// No block exists for the handle.
    NotFound,
}

/// Result of applying a lock transition at a handle.
pub enum LockOutcome {
    /// No block exists for the handle; there is nothing to lock.
    Absent,
    /// The lock is held by a different owner.
    Refused,
    /// New root with the transition applied.
    Updated(Arc<VersionedNode>),
}

/// One node of the persistent tree.
pub struct VersionedNode {
    block: Block,
    left: Option<Arc<VersionedNode>>,
    right: Option<Arc<VersionedNode>>,
    height: u32,
}

impl VersionedNode {
    fn height_of(node: &Option<Arc<Self>>) -> u32 {
        node.as_ref().map_or(0, |n| n.height)
    }

    fn make(block: Block, left: Option<Arc<Self>>, right: Option<Arc<Self>>) -> Arc<Self> {
        let height = 1 + Self::height_of(&left).max(Self::height_of(&right));
        Arc::new(VersionedNode {
            block,
            left,
            right,
            height,
        })
    }

    /// A single-node tree.
    pub fn leaf(block: Block) -> Arc<Self> {
        Self::make(block, None, None)
    }

    /// Handle this node is keyed by.
    pub fn handle(&self) -> Handle {
        self.block.handle()
    }

    /// The block stored at this node.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Left subtree.
    pub fn left(&self) -> Option<&Arc<Self>> {
        self.left.as_ref()
    }

    /// Right subtree.
    pub fn right(&self) -> Option<&Arc<Self>> {
        self.right.as_ref()
    }

    /// Height difference between the left and right subtrees.
    pub fn balance_factor(&self) -> i32 {
        Self::height_of(&self.left) as i32 - Self::height_of(&self.right) as i32
    }

    /// Exact-match lookup. Iterative, O(log n).
    pub fn find(mut node: Option<&Arc<Self>>, handle: Handle) -> Option<&Arc<Self>> {
        while let Some(current) = node {
            match handle.cmp(&current.handle()) {
                Ordering::Equal => return Some(current),
                Ordering::Less => node = current.left.as_ref(),
                Ordering::Greater => node = current.right.as_ref(),
            }
        }
        None
    }

    /// Copy-on-write insert-or-update.
    ///
    /// Inserts a new block when the handle is absent; otherwise replaces
    /// the existing block via [`Block::with_update`] with `start_version`
    /// as the conflict threshold, draining that block's listeners into
    /// `woken`. The old tree is untouched either way.
    pub fn write_at(
        node: Option<&Arc<Self>>,
        deflated: Deflated,
        start_version: u64,
        woken: &mut WokenLatches,
    ) -> Result<Arc<Self>, WriteConflict> {
        let current = match node {
            None => return Ok(Self::leaf(Block::new(deflated))),
            Some(current) => current,
        };
        match deflated.handle().cmp(&current.handle()) {
            Ordering::Equal => {
                let block = current
                    .block
                    .with_update(deflated, start_version, woken)
                    .ok_or(WriteConflict)?;
                Ok(Self::make(block, current.left.clone(), current.right.clone()))
            }
            Ordering::Less => {
                let left = Self::write_at(current.left.as_ref(), deflated, start_version, woken)?;
                Ok(Self::rebalance(
                    current.block.clone(),
                    Some(left),
                    current.right.clone(),
                ))
            }
            Ordering::Greater => {
                let right = Self::write_at(current.right.as_ref(), deflated, start_version, woken)?;
                Ok(Self::rebalance(
                    current.block.clone(),
                    current.left.clone(),
                    Some(right),
                ))
            }
        }
    }

    /// Register a retry latch on `handle`'s block.
    ///
    /// Copies only the path to the handle, and only when registration has
    /// an effect (an already-open latch leaves the tree untouched).
    pub fn add_listener(
        node: Option<&Arc<Self>>,
        handle: Handle,
        latch: &Arc<Latch>,
    ) -> ListenOutcome {
        let current = match node {
            None => return ListenOutcome::NotFound,
            Some(current) => current,
        };
        match handle.cmp(&current.handle()) {
            Ordering::Equal => match current.block.with_added_listener(latch) {
                None => ListenOutcome::AlreadyOpen,
                Some(block) => ListenOutcome::Registered(Self::make(
                    block,
                    current.left.clone(),
                    current.right.clone(),
                )),
            },
            Ordering::Less => match Self::add_listener(current.left.as_ref(), handle, latch) {
                ListenOutcome::Registered(left) => ListenOutcome::Registered(Self::make(
                    current.block.clone(),
                    Some(left),
                    current.right.clone(),
                )),
                other => other,
            },
            Ordering::Greater => match Self::add_listener(current.right.as_ref(), handle, latch) {
                ListenOutcome::Registered(right) => ListenOutcome::Registered(Self::make(
                    current.block.clone(),
                    current.left.clone(),
                    Some(right),
                )),
                other => other,
            },
        }
    }

    /// Apply a lock transition ([`Block::with_lock`]) at `handle`.
    pub fn write_lock_state(
        node: Option<&Arc<Self>>,
        handle: Handle,
        request: Option<LockState>,
    ) -> LockOutcome {
        let current = match node {
            None => return LockOutcome::Absent,
            Some(current) => current,
        };
        match handle.cmp(&current.handle()) {
            Ordering::Equal => match current.block.with_lock(request) {
                None => LockOutcome::Refused,
                Some(block) => LockOutcome::Updated(Self::make(
                    block,
                    current.left.clone(),
                    current.right.clone(),
                )),
            },
            Ordering::Less => match Self::write_lock_state(current.left.as_ref(), handle, request) {
                LockOutcome::Updated(left) => LockOutcome::Updated(Self::make(
                    current.block.clone(),
                    Some(left),
                    current.right.clone(),
                )),
                other => other,
            },
            Ordering::Greater => {
                match Self::write_lock_state(current.right.as_ref(), handle, request) {
                    LockOutcome::Updated(right) => LockOutcome::Updated(Self::make(
                        current.block.clone(),
                        current.left.clone(),
                        Some(right),
                    )),
                    other => other,
                }
            }
        }
    }

    // Rebalancing. `rebalance` is called with subtrees whose heights can
    // differ by at most 2 (one insert below an AVL tree), so a single or
    // double rotation restores the invariant.
    fn rebalance(block: Block, left: Option<Arc<Self>>, right: Option<Arc<Self>>) -> Arc<Self> {
        let left_height = Self::height_of(&left);
        let right_height = Self::height_of(&right);
        if left_height > right_height + 1 {
            if let Some(left) = left {
                return Self::rotate_right(block, left, right);
            }
        } else if right_height > left_height + 1 {
            if let Some(right) = right {
                return Self::rotate_left(block, left, right);
            }
        }
        Self::make(block, left, right)
    }

    fn rotate_right(block: Block, left: Arc<Self>, right: Option<Arc<Self>>) -> Arc<Self> {
        if left.balance_factor() < 0 {
            // left-right: the pivot is the left child's right subtree
            if let Some(pivot) = left.right.as_ref() {
                let new_left = Self::make(left.block.clone(), left.left.clone(), pivot.left.clone());
                let new_right = Self::make(block, pivot.right.clone(), right);
                return Self::make(pivot.block.clone(), Some(new_left), Some(new_right));
            }
        }
        // left-left single rotation
        let new_right = Self::make(block, left.right.clone(), right);
        Self::make(left.block.clone(), left.left.clone(), Some(new_right))
    }

    fn rotate_left(block: Block, left: Option<Arc<Self>>, right: Arc<Self>) -> Arc<Self> {
        if right.balance_factor() > 0 {
            // right-left: the pivot is the right child's left subtree
            if let Some(pivot) = right.left.as_ref() {
                let new_left = Self::make(block, left, pivot.left.clone());
                let new_right =
                    Self::make(right.block.clone(), pivot.right.clone(), right.right.clone());
                return Self::make(pivot.block.clone(), Some(new_left), Some(new_right));
            }
        }
        // right-right single rotation
        let new_left = Self::make(block, left, right.left.clone());
        Self::make(right.block.clone(), Some(new_left), right.right.clone())
    }

    /// Walk the whole tree checking BST order, balance, and memoized
    /// heights. Test support; returns a description of the first violation.
    pub fn check_invariants(node: Option<&Arc<Self>>) -> Result<(), String> {
        Self::check_between(node, None, None).map(|_| ())
    }

    fn check_between(
        node: Option<&Arc<Self>>,
        min: Option<Handle>,
        max: Option<Handle>,
    ) -> Result<u32, String> {
        let current = match node {
            None => return Ok(0),
            Some(current) => current,
        };
        let handle = current.handle();
        if let Some(min) = min {
            if handle <= min {
                return Err(format!("handle {handle} violates lower bound {min}"));
            }
        }
        if let Some(max) = max {
            if handle >= max {
                return Err(format!("handle {handle} violates upper bound {max}"));
            }
        }
        let left = Self::check_between(current.left.as_ref(), min, Some(handle))?;
        let right = Self::check_between(current.right.as_ref(), Some(handle), max)?;
        let expected = 1 + left.max(right);
        if current.height != expected {
            return Err(format!(
                "handle {handle}: memoized height {} but computed {expected}",
                current.height
            ));
        }
        let balance = left as i32 - right as i32;
        if !(-1..=1).contains(&balance) {
            return Err(format!("handle {handle}: balance factor {balance}"));
        }
        Ok(expected)
    }
}

impl std::fmt::Debug for VersionedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedNode")
            .field("handle", &self.handle())
            .field("height", &self.height)
            .field("balance", &self.balance_factor())
            .finish()
    }
}
