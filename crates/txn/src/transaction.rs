//! The transaction state machine
//!
//! A transaction is created against the heap's current snapshot and stays
//! pinned to it: every load is served at that version, regardless of what
//! commits in the meantime. Writes happen on privatized working copies; at
//! commit time the dirty ones are deflated and handed to the heap as one
//! atomic batch.
//!
//! ## States
//!
//! ```text
//! Active --commit--> Committed
//! Active --abort---> Aborted
//! Aborted/Committed --reset--> Active   (a brand-new logical transaction)
//! ```
//!
//! No other transitions exist. `abort_and_retry` is abort + blocking wait
//! + reset in one step.
//!
//! ## Commit sequence
//!
//! 1. Classify working copies; Fresh and Dirty form the write-set
//! 2. Empty write-set: mark Committed, touch nothing shared
//! 3. Acquire commit locks per policy (all-or-nothing; failure aborts)
//! 4. Deflate the write-set and hand it to the heap
//! 5. Write conflict: release locks, abort, surface the error
//! 6. Success: the published blocks are lock-free, nothing to release

use std::marker::PhantomData;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use mvstm_core::{
    DirtinessPolicy, Handle, Result, StmError, StmStatistics, Transactable, TxnId,
};
use mvstm_heap::{CommitResult, Latch, LockMode, MultiversionedHeap, Snapshot};

use crate::locks::{CommitLockPolicy, ExclusiveCommitLocks};
use crate::tranlocal::{Tranlocal, TypedTranlocal};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting loads, attaches, and writes.
    Active,
    /// Finished successfully; its writes (if any) are published.
    Committed,
    /// Finished without effect; its working copies are discarded.
    Aborted,
}

impl TransactionStatus {
    fn name(self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
        }
    }
}

/// A per-thread transaction against a [`MultiversionedHeap`].
///
/// Not `Send` and not `Sync`: a transaction belongs to the thread that
/// created it for its whole lifetime, which is what lets the working set
/// be a plain map with no synchronization.
pub struct Transaction {
    id: TxnId,
    status: TransactionStatus,
    snapshot: Arc<Snapshot>,
    tranlocals: FxHashMap<Handle, Box<dyn Tranlocal>>,
    heap: Arc<MultiversionedHeap>,
    stats: Arc<StmStatistics>,
    lock_policy: Box<dyn CommitLockPolicy>,
    commit_version: u64,
    _not_send: PhantomData<*const ()>,
}

impl Transaction {
    /// Begin a transaction at the heap's current version.
    pub fn new(heap: Arc<MultiversionedHeap>) -> Self {
        let snapshot = heap.active_snapshot();
        Self::with_snapshot(heap, snapshot)
    }

    /// Begin a transaction pinned to `version`.
    ///
    /// Fails with `LoadTooOld` when the heap no longer retains it.
    pub fn new_at(heap: Arc<MultiversionedHeap>, version: u64) -> Result<Self> {
        let snapshot = heap.snapshot_at(version)?;
        Ok(Self::with_snapshot(heap, snapshot))
    }

    fn with_snapshot(heap: Arc<MultiversionedHeap>, snapshot: Arc<Snapshot>) -> Self {
        let stats = Arc::clone(heap.statistics());
        stats.record_transaction_started();
        let id = TxnId::allocate();
        trace!(
            target: "mvstm::txn",
            txn = id.as_u64(),
            read_version = snapshot.version(),
            "transaction_started"
        );
        Transaction {
            id,
            status: TransactionStatus::Active,
            snapshot,
            tranlocals: FxHashMap::default(),
            heap,
            stats,
            lock_policy: Box::new(ExclusiveCommitLocks),
            commit_version: 0,
            _not_send: PhantomData,
        }
    }

    /// This transaction's identity (lock owner).
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Heap version every load is served at.
    pub fn read_version(&self) -> u64 {
        self.snapshot.version()
    }

    /// Number of objects in the working set.
    pub fn tracked(&self) -> usize {
        self.tranlocals.len()
    }

    /// Replace the commit lock policy.
    pub fn set_lock_policy(&mut self, policy: impl CommitLockPolicy + 'static) {
        self.lock_policy = Box::new(policy);
    }

    fn ensure_active(&self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => Ok(()),
            other => Err(StmError::DeadTransaction {
                status: other.name(),
            }),
        }
    }

    /// Load the working copy for `handle`, privatizing it on first access.
    ///
    /// Repeat loads return the same copy — the same allocation — for the
    /// lifetime of the transaction, so reads and writes through separate
    /// loads always observe each other. The dirtiness `policy` applies
    /// only when the copy is first created.
    pub fn load_typed<T: Transactable>(
        &mut self,
        handle: Handle,
        policy: DirtinessPolicy,
    ) -> Result<&mut TypedTranlocal<T>> {
        self.ensure_active()?;
        self.stats.record_load();

        if !self.tranlocals.contains_key(&handle) {
            let privatized = self.privatize::<T>(handle, policy)?;
            self.tranlocals.insert(handle, Box::new(privatized));
        }
        let tranlocal = match self.tranlocals.get_mut(&handle) {
            Some(tranlocal) => tranlocal,
            None => {
                return Err(StmError::Panic(format!(
                    "working copy for handle {handle} vanished after insertion"
                )))
            }
        };
        tranlocal
            .as_any_mut()
            .downcast_mut::<TypedTranlocal<T>>()
            .ok_or(StmError::WrongType { handle })
    }

    fn privatize<T: Transactable>(
        &self,
        handle: Handle,
        policy: DirtinessPolicy,
    ) -> Result<TypedTranlocal<T>> {
        let block = self
            .snapshot
            .block(handle)
            .ok_or(StmError::LoadUncommitted { handle })?;
        // Lock state is current, not snapshotted: a lock taken (or
        // released) after this transaction pinned its snapshot still
        // governs whether the load is admitted.
        let current = self.heap.active_snapshot();
        if let Some(lock) = current.block(handle).and_then(|current| current.lock()) {
            if lock.owner != self.id && lock.mode == LockMode::Exclusive {
                return Err(StmError::LoadLocked { handle });
            }
        }
        let deflated = block.deflated();
        let origin = deflated
            .downcast::<T>()
            .ok_or(StmError::WrongType { handle })?;
        trace!(
            target: "mvstm::txn",
            txn = self.id.as_u64(),
            handle = handle.as_u64(),
            origin_version = deflated.version(),
            "privatized"
        );
        Ok(TypedTranlocal::privatized(
            handle,
            origin,
            deflated.version(),
            policy,
        ))
    }

    /// Register a brand-new object into the working set.
    ///
    /// The copy must never have been committed anywhere, and its handle
    /// must not already be attached; either condition is an invariant
    /// violation in calling code, not a recoverable state.
    pub fn attach_new<L: Tranlocal>(&mut self, tranlocal: L) -> Result<()> {
        self.ensure_active()?;
        let handle = tranlocal.handle();
        if tranlocal.status() == crate::tranlocal::DirtyStatus::Committed {
            return Err(StmError::Panic(format!(
                "attach_new: working copy for handle {handle} is already committed"
            )));
        }
        if self.tranlocals.contains_key(&handle) {
            return Err(StmError::Panic(format!(
                "attach_new: handle {handle} is already attached"
            )));
        }
        self.stats.record_attach();
        self.tranlocals.insert(handle, Box::new(tranlocal));
        Ok(())
    }

    /// Commit the transaction. Returns the heap version its effects are
    /// visible at (the read version for a read-only commit).
    ///
    /// Idempotent once Committed; fails with `DeadTransaction` when
    /// Aborted. On any failure after the state checks the transaction is
    /// aborted and all acquired locks are released before the error is
    /// returned.
    pub fn commit(&mut self) -> Result<u64> {
        match self.status {
            TransactionStatus::Committed => return Ok(self.commit_version),
            TransactionStatus::Aborted => {
                return Err(StmError::DeadTransaction { status: "aborted" })
            }
            TransactionStatus::Active => {}
        }

        let mut write_set: SmallVec<[Handle; 8]> = SmallVec::new();
        for (handle, tranlocal) in &self.tranlocals {
            if tranlocal.status().needs_write() {
                write_set.push(*handle);
            }
        }

        if write_set.is_empty() {
            // Read-only: no heap interaction, no version bump.
            self.status = TransactionStatus::Committed;
            self.commit_version = self.snapshot.version();
            self.stats.record_commit_readonly();
            self.stats.record_transaction_committed();
            trace!(
                target: "mvstm::txn",
                txn = self.id.as_u64(),
                version = self.commit_version,
                "commit_readonly"
            );
            return Ok(self.commit_version);
        }

        if let Some(mode) = self.lock_policy.commit_mode() {
            if let Err(err) = self.heap.lock_all(self.id, mode, &write_set) {
                self.abort_internal("commit lock refused");
                return Err(err);
            }
        }

        let mut changes: Vec<mvstm_core::Deflated> = Vec::with_capacity(write_set.len());
        for handle in &write_set {
            if let Some(tranlocal) = self.tranlocals.get_mut(handle) {
                changes.push(tranlocal.deflate());
            }
        }

        match self.heap.commit(&self.snapshot, &changes) {
            CommitResult::Success { snapshot, written } => {
                self.status = TransactionStatus::Committed;
                self.commit_version = snapshot.version();
                self.stats.record_transaction_committed();
                debug!(
                    target: "mvstm::txn",
                    txn = self.id.as_u64(),
                    version = self.commit_version,
                    written,
                    "commit_succeeded"
                );
                Ok(self.commit_version)
            }
            CommitResult::WriteConflict { handle } => {
                self.heap.unlock_all(self.id, &write_set);
                self.abort_internal("write conflict");
                Err(StmError::WriteConflict { handle })
            }
            CommitResult::ReadOnly => {
                // The write-set was non-empty; the heap cannot report an
                // empty batch here.
                self.heap.unlock_all(self.id, &write_set);
                self.abort_internal("inconsistent commit result");
                Err(StmError::Panic(
                    "heap reported a read-only commit for a non-empty write-set".into(),
                ))
            }
        }
    }

    /// Abort the transaction, discarding every working copy.
    ///
    /// Idempotent when already Aborted; a Committed transaction cannot be
    /// aborted.
    pub fn abort(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => {
                self.abort_internal("explicit abort");
                Ok(())
            }
            TransactionStatus::Aborted => Ok(()),
            TransactionStatus::Committed => {
                Err(StmError::DeadTransaction { status: "committed" })
            }
        }
    }

    fn abort_internal(&mut self, reason: &'static str) {
        self.tranlocals.clear();
        self.status = TransactionStatus::Aborted;
        self.stats.record_transaction_aborted();
        debug!(
            target: "mvstm::txn",
            txn = self.id.as_u64(),
            reason,
            "transaction_aborted"
        );
    }

    /// Abort, block until one of the objects this transaction read is
    /// committed past its read version, then reset to Active at a fresh
    /// read version.
    ///
    /// Only heap-resident reads count: a transaction whose working set
    /// holds nothing privatized from the heap can never be woken, and
    /// fails immediately with `NoProgressPossible` (still Active, nothing
    /// discarded).
    pub fn abort_and_retry(&mut self) -> Result<()> {
        self.ensure_active()?;

        let watched: Vec<Handle> = self
            .tranlocals
            .values()
            .filter(|tranlocal| tranlocal.loaded_from_heap())
            .map(|tranlocal| tranlocal.handle())
            .collect();
        if watched.is_empty() {
            return Err(StmError::NoProgressPossible);
        }

        let latch = Arc::new(Latch::new());
        self.heap.listen(&self.snapshot, &latch, &watched)?;
        self.abort_internal("retry");
        self.stats.record_transaction_retried();
        debug!(
            target: "mvstm::txn",
            txn = self.id.as_u64(),
            watched = watched.len(),
            read_version = self.snapshot.version(),
            "retry_blocked"
        );
        latch.wait();
        self.reset();
        Ok(())
    }

    /// Start over as a brand-new logical transaction reusing this struct:
    /// fresh id, fresh read version, empty working set.
    pub fn reset(&mut self) {
        self.snapshot = self.heap.active_snapshot();
        self.tranlocals.clear();
        self.status = TransactionStatus::Active;
        self.commit_version = 0;
        self.id = TxnId::allocate();
        self.stats.record_transaction_started();
        trace!(
            target: "mvstm::txn",
            txn = self.id.as_u64(),
            read_version = self.snapshot.version(),
            "transaction_reset"
        );
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("read_version", &self.read_version())
            .field("tracked", &self.tracked())
            .finish()
    }
}
