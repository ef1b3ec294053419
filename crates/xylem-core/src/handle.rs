//! Scoped handle returned by `open_collection`.

use std::ops::Deref;
use std::sync::Arc;

use crate::collection::Collection;
use crate::lock::PathLockGuard;

/// An opened collection together with the lock acquired for it.
///
/// The handle owns the lock: dropping it (or calling [`release`]) gives
/// the lock back. There is no way to keep the lock while forgetting the
/// handle, so scoped release is enforced by the borrow checker rather
/// than by caller discipline.
///
/// [`release`]: CollectionHandle::release
#[derive(Debug)]
pub struct CollectionHandle {
    collection: Arc<Collection>,
    guard: Option<PathLockGuard>,
}

impl CollectionHandle {
    pub(crate) fn new(collection: Arc<Collection>, guard: Option<PathLockGuard>) -> Self {
        Self { collection, guard }
    }

    /// The opened collection snapshot.
    #[must_use]
    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    /// Whether this handle holds a lock (false for `LockMode::None`).
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    /// Release the lock early, keeping the snapshot.
    #[must_use]
    pub fn release(mut self) -> Arc<Collection> {
        self.guard.take();
        self.collection
    }
}

impl Deref for CollectionHandle {
    type Target = Collection;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}
