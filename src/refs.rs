//! Typed transactional references
//!
//! A [`TxRef`] is a small, copyable token naming one transactional object:
//! a handle plus the dirtiness policy the object was created with. It
//! holds no data itself — all state lives in the heap and in the current
//! transaction's working copies — so refs can be freely copied and shared
//! across threads while the objects they name stay transactional.

use std::marker::PhantomData;

use mvstm_core::{DirtinessPolicy, Handle, Result, Transactable};
use mvstm_txn::{Transaction, TypedTranlocal};

/// Typed reference to a transactional object.
///
/// Created by attaching an initial value inside a transaction; once that
/// transaction commits, the object is visible to every other transaction
/// under the same ref.
///
/// # Examples
///
/// ```
/// use mvstm::prelude::*;
///
/// let stm = Stm::new();
/// let name = stm.atomically(|tx| TxRef::attach(tx, String::from("world")))?;
///
/// stm.atomically(|tx| name.set(tx, String::from("mvstm")))?;
/// assert_eq!(stm.atomically(|tx| name.get(tx))?, "mvstm");
/// # Ok::<(), mvstm::Error>(())
/// ```
pub struct TxRef<T: Transactable> {
    handle: Handle,
    policy: DirtinessPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Transactable> Clone for TxRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Transactable> Copy for TxRef<T> {}

impl<T: Transactable> TxRef<T> {
    /// Attach a brand-new object with value-based dirtiness.
    ///
    /// A write that restores the original value leaves the object clean:
    /// the commit is read-only for it and its version does not advance.
    pub fn attach(tx: &mut Transaction, value: T) -> Result<Self> {
        Self::attach_with(tx, value, DirtinessPolicy::ValueBased)
    }

    /// Attach a brand-new object with write-counted dirtiness.
    ///
    /// Every write counts, so a bounce-back (A→B→A) still publishes and
    /// still conflicts with concurrent readers of the old state.
    pub fn attach_counted(tx: &mut Transaction, value: T) -> Result<Self> {
        Self::attach_with(tx, value, DirtinessPolicy::WriteCounted)
    }

    /// Attach a brand-new object with an explicit dirtiness policy.
    pub fn attach_with(
        tx: &mut Transaction,
        value: T,
        policy: DirtinessPolicy,
    ) -> Result<Self> {
        let handle = Handle::allocate();
        tx.attach_new(TypedTranlocal::fresh(handle, value, policy))?;
        Ok(TxRef {
            handle,
            policy,
            _marker: PhantomData,
        })
    }

    /// Handle this ref points at.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The dirtiness policy this ref was created with.
    pub fn policy(&self) -> DirtinessPolicy {
        self.policy
    }

    /// Read the value, cloning it out of the working copy.
    pub fn get(&self, tx: &mut Transaction) -> Result<T> {
        Ok(tx
            .load_typed::<T>(self.handle, self.policy)?
            .value()
            .snapshot())
    }

    /// Borrow the value inside the working copy.
    pub fn read<'a>(&self, tx: &'a mut Transaction) -> Result<&'a T> {
        Ok(tx.load_typed::<T>(self.handle, self.policy)?.value())
    }

    /// Replace the value.
    pub fn set(&self, tx: &mut Transaction, value: T) -> Result<()> {
        tx.load_typed::<T>(self.handle, self.policy)?.set(value);
        Ok(())
    }

    /// Mutate the value in place.
    pub fn modify(&self, tx: &mut Transaction, f: impl FnOnce(&mut T)) -> Result<()> {
        tx.load_typed::<T>(self.handle, self.policy)?.modify(f);
        Ok(())
    }
}

impl<T: Transactable> std::fmt::Debug for TxRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxRef")
            .field("handle", &self.handle)
            .field("policy", &self.policy)
            .finish()
    }
}
