//! Single-use wakeup gate
//!
//! A latch starts closed and can be opened exactly once; there is no reset.
//! Waiters block until the latch opens, with an atomic fast path so that
//! checking an already-open latch costs one load and no lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A single-use, thread-safe wakeup gate.
///
/// `open` is idempotent. A waiter that arrives after the latch opened
/// returns immediately. The opener takes the internal mutex before
/// notifying, so a waiter that observed the latch closed and is entering
/// the condvar cannot miss the wakeup.
pub struct Latch {
    opened: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Latch {
    /// A new, closed latch.
    pub fn new() -> Self {
        Latch {
            opened: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Has the latch been opened?
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Open the latch and wake every waiter. Idempotent.
    pub fn open(&self) {
        if self.opened.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Block until the latch opens. Uninterruptible.
    pub fn wait(&self) {
        if self.is_open() {
            return;
        }
        let mut guard = self.lock.lock();
        while !self.is_open() {
            self.cond.wait(&mut guard);
        }
    }

    /// Block until the latch opens or `timeout` elapses.
    ///
    /// Returns whether the latch is open. The core retry protocol never
    /// uses this; it exists for callers and tests that cannot block
    /// forever.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.is_open() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_open() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.is_open();
            }
        }
        true
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").field("open", &self.is_open()).finish()
    }
}
