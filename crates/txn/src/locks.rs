//! Commit lock policy
//!
//! Version validation during the publication fold is what makes commits
//! correct; the pessimistic locks taken here are an additional fence that
//! keeps conflicting writers from racing each other through deflation.
//! The policy decides whether and how that fence is applied.

use mvstm_heap::LockMode;

/// Which pessimistic locks a commit takes on its write-set.
pub trait CommitLockPolicy {
    /// Mode to acquire on every write-set member already present in the
    /// heap, or `None` to rely purely on version validation.
    fn commit_mode(&self) -> Option<LockMode>;
}

/// Default policy: exclusive locks on the whole write-set.
///
/// Acquisition is atomic (one published snapshot carries all of them), so
/// a refusal leaves nothing to clean up.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExclusiveCommitLocks;

impl CommitLockPolicy for ExclusiveCommitLocks {
    fn commit_mode(&self) -> Option<LockMode> {
        Some(LockMode::Exclusive)
    }
}

/// Lock-free policy: version validation only.
///
/// Ordinary optimistic transactions are correct without any pessimistic
/// locking; this policy skips the lock round-trip entirely.
#[derive(Debug, Default, Clone, Copy)]
pub struct OptimisticOnly;

impl CommitLockPolicy for OptimisticOnly {
    fn commit_mode(&self) -> Option<LockMode> {
        None
    }
}
