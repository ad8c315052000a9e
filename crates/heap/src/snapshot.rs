//! Immutable whole-heap views
//!
//! A [`Snapshot`] pairs a tree root with the version it was published at.
//! Snapshots are values: once built they never change, and a reader that
//! holds one keeps every subtree it references alive, so reads against it
//! are stable regardless of later commits.
//!
//! The heap does not keep every snapshot forever. A [`SnapshotChain`] holds
//! the most recent few (newest first) so that a transaction pinned to a
//! slightly-stale version can still be served; anything older is pruned and
//! surfaces as `LoadTooOld`.

use std::sync::Arc;

use mvstm_core::{Deflated, Handle};

use crate::block::Block;
use crate::tree::VersionedNode;

/// An immutable view of the whole heap at one version.
pub struct Snapshot {
    root: Option<Arc<VersionedNode>>,
    version: u64,
}

impl Snapshot {
    /// The empty heap at version 0.
    pub fn empty() -> Self {
        Snapshot {
            root: None,
            version: 0,
        }
    }

    /// A snapshot around an existing tree.
    pub fn new(root: Option<Arc<VersionedNode>>, version: u64) -> Self {
        Snapshot { root, version }
    }

    /// Version this snapshot was published at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Root of the underlying tree.
    pub fn root(&self) -> Option<&Arc<VersionedNode>> {
        self.root.as_ref()
    }

    /// Deflated state of `handle`, if present.
    pub fn read(&self, handle: Handle) -> Option<&Deflated> {
        self.block(handle).map(Block::deflated)
    }

    /// Full block of `handle`, if present. Exposes lock state to the
    /// transaction layer.
    pub fn block(&self, handle: Handle) -> Option<&Block> {
        VersionedNode::find(self.root.as_ref(), handle).map(|node| node.block())
    }

    /// Version at which `handle` was last written, `None` when absent.
    pub fn read_version(&self, handle: Handle) -> Option<u64> {
        self.block(handle).map(Block::version)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Bounded history of recent snapshots, newest first.
///
/// The chain is itself immutable; publishing produces a new chain that
/// shares its tail with the old one. Depth is bounded at publication time,
/// which is the liveness guarantee: an idle heap holds at most `depth`
/// snapshots regardless of how many were ever published.
pub struct SnapshotChain {
    snapshot: Arc<Snapshot>,
    parent: Option<Arc<SnapshotChain>>,
    len: usize,
}

impl SnapshotChain {
    /// A chain holding a single snapshot.
    pub fn new(snapshot: Arc<Snapshot>) -> Arc<Self> {
        Arc::new(SnapshotChain {
            snapshot,
            parent: None,
            len: 1,
        })
    }

    /// The newest snapshot.
    pub fn head(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Number of snapshots currently retained.
    pub fn depth(&self) -> usize {
        self.len
    }

    /// Oldest version still reachable through the chain.
    pub fn oldest_version(&self) -> u64 {
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            current = parent;
        }
        current.snapshot.version()
    }

    // Rebuild the first `keep` links of the chain, dropping the rest.
    fn truncated(&self, keep: usize) -> Option<Arc<Self>> {
        if keep == 0 {
            return None;
        }
        let parent = self
            .parent
            .as_ref()
            .and_then(|parent| parent.truncated(keep - 1));
        let len = parent.as_ref().map_or(0, |p| p.len) + 1;
        Some(Arc::new(SnapshotChain {
            snapshot: self.snapshot.clone(),
            parent,
            len,
        }))
    }

    /// Prepend a newer snapshot, pruning the chain to `max_depth`.
    pub fn extended(&self, snapshot: Arc<Snapshot>, max_depth: usize) -> Arc<Self> {
        debug_assert!(snapshot.version() > self.snapshot.version());
        let parent = self.truncated(max_depth.saturating_sub(1));
        let len = parent.as_ref().map_or(0, |p| p.len) + 1;
        Arc::new(SnapshotChain {
            snapshot,
            parent,
            len,
        })
    }

    /// Swap the head for another snapshot at the same version.
    ///
    /// Used for listener registration and lock transitions, which change
    /// block metadata without publishing a new heap version.
    pub fn with_head_replaced(&self, snapshot: Arc<Snapshot>) -> Arc<Self> {
        debug_assert_eq!(snapshot.version(), self.snapshot.version());
        Arc::new(SnapshotChain {
            snapshot,
            parent: self.parent.clone(),
            len: self.len,
        })
    }

    /// Newest retained snapshot with `version() <= version`, if any.
    pub fn find_at_most(&self, version: u64) -> Option<Arc<Snapshot>> {
        let mut current = Some(self);
        while let Some(chain) = current {
            if chain.snapshot.version() <= version {
                return Some(chain.snapshot.clone());
            }
            current = chain.parent.as_deref();
        }
        None
    }
}

impl std::fmt::Debug for SnapshotChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotChain")
            .field("head_version", &self.snapshot.version())
            .field("depth", &self.len)
            .finish()
    }
}
