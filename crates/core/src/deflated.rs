//! Deflated object state
//!
//! A [`Deflated`] value is the immutable, versioned form of one object's
//! state as stored in the heap: produced once (at commit time or when a new
//! object is first published) and never mutated afterwards.
//!
//! The payload is held behind `Arc<dyn Any + Send + Sync>` so that cloning a
//! deflated value for a new snapshot is O(1) and handing it to readers is
//! zero-copy; the payload itself is freed when the last snapshot referencing
//! it is dropped.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::handle::Handle;

/// Shared, type-erased payload of a deflated object.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The immutable, versioned serialized form of one object's state.
///
/// `version` is the commit version at which this state became visible. The
/// heap stamps the final version onto each change while folding a write
/// batch, since the commit version is not known until publication succeeds;
/// the version a caller supplies when constructing a `Deflated` is therefore
/// provisional.
#[derive(Clone)]
pub struct Deflated {
    handle: Handle,
    version: u64,
    payload: Payload,
}

impl Deflated {
    /// Wrap a concrete value as a deflated payload.
    pub fn new<T: Send + Sync + 'static>(handle: Handle, version: u64, value: T) -> Self {
        Self::from_payload(handle, version, Arc::new(value))
    }

    /// Build a deflated value from an already-shared payload.
    pub fn from_payload(handle: Handle, version: u64, payload: Payload) -> Self {
        Deflated {
            handle,
            version,
            payload,
        }
    }

    /// Handle of the object this state belongs to.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Commit version at which this state became visible.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The type-erased payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Typed view of the payload, if it holds a `T`.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.payload.clone().downcast::<T>().ok()
    }

    /// The same state re-stamped with a different version.
    ///
    /// Used by the heap while folding a write batch: the payload is shared,
    /// only the version field differs.
    pub fn restamped(&self, version: u64) -> Self {
        Deflated {
            handle: self.handle,
            version,
            payload: self.payload.clone(),
        }
    }
}

impl fmt::Debug for Deflated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deflated")
            .field("handle", &self.handle)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
