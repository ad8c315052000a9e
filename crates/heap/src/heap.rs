//! The multiversioned heap
//!
//! The one piece of state shared between threads: a reference to the
//! current [`SnapshotChain`], swapped atomically via [`ArcSwap`]. Every
//! mutation — commit, listener registration, lock transition — follows the
//! same shape:
//!
//! 1. load the current chain
//! 2. build a replacement by copy-on-write against its head
//! 3. `compare_and_swap` the reference
//! 4. on failure, another thread published first: rebuild and try again
//!
//! The loops spin but never sleep, and no step holds a lock. A write
//! conflict discovered during step 2 is not a publication race and is
//! returned immediately — retrying would find the same newer version.
//!
//! Listener latches collected while folding a commit are opened strictly
//! after the CAS succeeds, so a woken waiter always observes a published
//! version at least as new as the write that woke it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, trace};

use mvstm_core::{Deflated, Handle, Result, StmError, StmStatistics, TxnId};

use crate::block::{LockMode, LockState, WokenLatches};
use crate::latch::Latch;
use crate::snapshot::{Snapshot, SnapshotChain};
use crate::tree::{ListenOutcome, LockOutcome, VersionedNode};

/// Snapshots retained for stale-pinned readers when not configured
/// otherwise.
pub const DEFAULT_CHAIN_DEPTH: usize = 8;

/// Outcome of handing a write batch to the heap.
#[derive(Debug)]
pub enum CommitResult {
    /// The batch was empty; nothing was published and the version did not
    /// move.
    ReadOnly,
    /// The batch was published as a new snapshot.
    Success {
        /// The snapshot the batch was published as.
        snapshot: Arc<Snapshot>,
        /// Number of objects written.
        written: usize,
    },
    /// An object in the batch was committed past the writer's start
    /// version by another transaction. Nothing was published.
    WriteConflict {
        /// First conflicting handle encountered.
        handle: Handle,
    },
}

/// The shared, mutable coordination point of the runtime.
pub struct MultiversionedHeap {
    published: ArcSwap<SnapshotChain>,
    chain_depth: usize,
    stats: Arc<StmStatistics>,
}

impl MultiversionedHeap {
    /// An empty heap at version 0 with the default history depth.
    pub fn new() -> Self {
        Self::with_chain_depth(DEFAULT_CHAIN_DEPTH)
    }

    /// An empty heap retaining up to `chain_depth` snapshots.
    ///
    /// # Panics
    ///
    /// Panics if `chain_depth` is zero; the active snapshot itself lives
    /// in the chain.
    pub fn with_chain_depth(chain_depth: usize) -> Self {
        assert!(chain_depth >= 1, "chain depth must retain the active snapshot");
        MultiversionedHeap {
            published: ArcSwap::from(SnapshotChain::new(Arc::new(Snapshot::empty()))),
            chain_depth,
            stats: Arc::new(StmStatistics::new()),
        }
    }

    /// Shared statistics counters.
    pub fn statistics(&self) -> &Arc<StmStatistics> {
        &self.stats
    }

    /// The currently published snapshot. Lock-free.
    pub fn active_snapshot(&self) -> Arc<Snapshot> {
        self.published.load().head().clone()
    }

    /// Version of the currently published snapshot. Lock-free.
    pub fn active_version(&self) -> u64 {
        self.published.load().head().version()
    }

    /// The newest retained snapshot at or below `version`.
    ///
    /// Fails with `LoadTooOld` when the chain has pruned past it.
    pub fn snapshot_at(&self, version: u64) -> Result<Arc<Snapshot>> {
        let chain = self.published.load();
        chain.find_at_most(version).ok_or(StmError::LoadTooOld {
            requested: version,
            earliest: chain.oldest_version(),
        })
    }

    /// Atomically graft `changes` onto the heap as one new snapshot.
    ///
    /// `start` is the snapshot the writing transaction read from; its
    /// version is the conflict threshold. The fold is rebuilt from scratch
    /// whenever the publication CAS loses to a concurrent commit, so the
    /// batch is applied exactly once, against exactly one parent snapshot.
    pub fn commit(&self, start: &Snapshot, changes: &[Deflated]) -> CommitResult {
        self.stats.record_commit_attempted();
        if changes.is_empty() {
            self.stats.record_commit_readonly();
            return CommitResult::ReadOnly;
        }

        loop {
            let current = self.published.load_full();
            let head = current.head();
            let next_version = head.version() + 1;

            let mut woken = WokenLatches::new();
            let mut root = head.root().cloned();
            let mut conflict = None;
            for change in changes {
                match VersionedNode::write_at(
                    root.as_ref(),
                    change.restamped(next_version),
                    start.version(),
                    &mut woken,
                ) {
                    Ok(node) => root = Some(node),
                    Err(_) => {
                        conflict = Some(change.handle());
                        break;
                    }
                }
            }

            if let Some(handle) = conflict {
                self.stats.record_write_conflict();
                self.stats.record_object_conflict(handle);
                debug!(
                    target: "mvstm::heap",
                    handle = handle.as_u64(),
                    start_version = start.version(),
                    head_version = head.version(),
                    "commit_write_conflict"
                );
                return CommitResult::WriteConflict { handle };
            }

            let snapshot = Arc::new(Snapshot::new(root, next_version));
            let next_chain = current.extended(snapshot.clone(), self.chain_depth);
            let previous = self.published.compare_and_swap(&current, next_chain);
            if !Arc::ptr_eq(&previous, &current) {
                // Lost the publication race; fold again against the winner.
                self.stats.record_publication_race();
                continue;
            }

            // Published. Only now may waiters observe the new version.
            for latch in woken {
                latch.open();
                self.stats.record_latch_opened();
            }
            for change in changes {
                self.stats.record_object_write(change.handle());
            }
            self.stats.record_commit_succeeded();
            debug!(
                target: "mvstm::heap",
                version = next_version,
                written = changes.len(),
                "commit_published"
            );
            return CommitResult::Success {
                snapshot,
                written: changes.len(),
            };
        }
    }

    /// Register `latch` to open when any of `handles` is committed past
    /// `start`'s version.
    ///
    /// Opens the latch immediately when one of the handles has already
    /// moved — the event the caller wants to wait for has happened, and
    /// blocking would miss it. An empty handle set can never be woken and
    /// is rejected as `NoProgressPossible`; a handle with no committed
    /// state is `NoSuchObject`.
    pub fn listen(&self, start: &Snapshot, latch: &Arc<Latch>, handles: &[Handle]) -> Result<()> {
        if handles.is_empty() {
            return Err(StmError::NoProgressPossible);
        }

        for &handle in handles {
            loop {
                if latch.is_open() {
                    return Ok(());
                }
                let current = self.published.load_full();
                let head = current.head();
                match head.read_version(handle) {
                    None => return Err(StmError::NoSuchObject { handle }),
                    Some(version) if version > start.version() => {
                        latch.open();
                        self.stats.record_latch_opened();
                        trace!(
                            target: "mvstm::heap",
                            handle = handle.as_u64(),
                            version,
                            start_version = start.version(),
                            "listen_already_satisfied"
                        );
                        return Ok(());
                    }
                    Some(_) => match VersionedNode::add_listener(head.root(), handle, latch) {
                        ListenOutcome::AlreadyOpen => return Ok(()),
                        ListenOutcome::NotFound => {
                            return Err(StmError::NoSuchObject { handle })
                        }
                        ListenOutcome::Registered(root) => {
                            let snapshot = Arc::new(Snapshot::new(Some(root), head.version()));
                            let next_chain = current.with_head_replaced(snapshot);
                            let previous = self.published.compare_and_swap(&current, next_chain);
                            if Arc::ptr_eq(&previous, &current) {
                                self.stats.record_listener_registered();
                                break;
                            }
                            // A commit (or another listener) got in first;
                            // re-check the handle's version before retrying.
                            self.stats.record_publication_race();
                        }
                    },
                }
            }
        }
        Ok(())
    }

    /// Acquire `mode` locks owned by `owner` on every handle in `handles`,
    /// atomically.
    ///
    /// All requested locks land in one published snapshot, so acquisition
    /// is all-or-nothing: a single refusal abandons the attempt with
    /// `FailedToObtainLocks` and nothing is published, which is what keeps
    /// the failure path free of lock leaks. Handles with no committed
    /// state are skipped — a fresh object is invisible to other
    /// transactions and needs no lock.
    pub fn lock_all(&self, owner: TxnId, mode: LockMode, handles: &[Handle]) -> Result<()> {
        if handles.is_empty() {
            return Ok(());
        }
        let request = Some(LockState { owner, mode });

        loop {
            let current = self.published.load_full();
            let head = current.head();
            let mut root = head.root().cloned();
            let mut changed = false;

            for &handle in handles {
                match VersionedNode::write_lock_state(root.as_ref(), handle, request) {
                    LockOutcome::Absent => {}
                    LockOutcome::Refused => {
                        self.stats.record_lock_failure();
                        debug!(
                            target: "mvstm::heap",
                            handle = handle.as_u64(),
                            owner = owner.as_u64(),
                            "lock_refused"
                        );
                        return Err(StmError::FailedToObtainLocks { handle });
                    }
                    LockOutcome::Updated(node) => {
                        root = Some(node);
                        changed = true;
                    }
                }
            }

            if !changed {
                return Ok(());
            }
            let snapshot = Arc::new(Snapshot::new(root, head.version()));
            let next_chain = current.with_head_replaced(snapshot);
            let previous = self.published.compare_and_swap(&current, next_chain);
            if Arc::ptr_eq(&previous, &current) {
                return Ok(());
            }
            self.stats.record_publication_race();
        }
    }

    /// Release every lock in `handles` held by `owner`.
    ///
    /// Locks held by other owners — and handles that are absent or free —
    /// are left alone, so a transaction that failed halfway through its
    /// commit can call this unconditionally on its whole write-set.
    pub fn unlock_all(&self, owner: TxnId, handles: &[Handle]) {
        loop {
            let current = self.published.load_full();
            let head = current.head();
            let mut root = head.root().cloned();
            let mut changed = false;

            for &handle in handles {
                let held_by_owner = VersionedNode::find(root.as_ref(), handle)
                    .and_then(|node| node.block().lock())
                    .map_or(false, |lock| lock.owner == owner);
                if !held_by_owner {
                    continue;
                }
                if let LockOutcome::Updated(node) =
                    VersionedNode::write_lock_state(root.as_ref(), handle, None)
                {
                    root = Some(node);
                    changed = true;
                }
            }

            if !changed {
                return;
            }
            let snapshot = Arc::new(Snapshot::new(root, head.version()));
            let next_chain = current.with_head_replaced(snapshot);
            let previous = self.published.compare_and_swap(&current, next_chain);
            if Arc::ptr_eq(&previous, &current) {
                return;
            }
            self.stats.record_publication_race();
        }
    }

    /// Handles currently holding committed state, in key order. Test and
    /// diagnostics support; the runtime never enumerates the heap.
    pub fn committed_handles(&self) -> Vec<Handle> {
        let snapshot = self.active_snapshot();
        let mut handles = Vec::new();
        collect_in_order(snapshot.root(), &mut handles);
        handles
    }
}

fn collect_in_order(node: Option<&Arc<VersionedNode>>, out: &mut Vec<Handle>) {
    if let Some(node) = node {
        collect_in_order(node.left(), out);
        out.push(node.handle());
        collect_in_order(node.right(), out);
    }
}

impl Default for MultiversionedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultiversionedHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiversionedHeap")
            .field("version", &self.active_version())
            .field("chain_depth", &self.chain_depth)
            .finish()
    }
}
