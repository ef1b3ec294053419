//! The collection cache: path to resident collection.
//!
//! The cache is the authority for "is this path currently resident". Its
//! internal `RwLock` only protects the map structure; coherence of the
//! *values* is the path lock manager's business. Callers consult the
//! cache holding at least a read lock on the path and mutate it holding
//! the write lock (or the parent's write lock, which covers the child by
//! the subtree convention).
//!
//! `get_or_try_populate` holds the map lock across the loader so that two
//! racing readers can never install two distinct objects for one path.
//!
//! Lifecycle: empty at startup; `clear` at shutdown. There is no
//! size-bounded eviction here: residency is a correctness property for
//! this layer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;
use xylem_error::Result;
use xylem_types::CollectionPath;

use crate::collection::Collection;

/// Process-wide path-to-collection map.
#[derive(Default)]
pub struct CollectionCache {
    map: RwLock<HashMap<CollectionPath, Arc<Collection>>>,
}

impl CollectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the resident collection, if any.
    #[must_use]
    pub fn get(&self, path: &CollectionPath) -> Option<Arc<Collection>> {
        self.map.read().get(path).cloned()
    }

    /// Bind `collection` at its path, replacing any previous binding.
    pub fn insert(&self, collection: Arc<Collection>) {
        let path = collection.path.clone();
        trace!(path = %path, "cache insert");
        self.map.write().insert(path, collection);
    }

    /// Return the binding, populating it from `load` on a miss.
    ///
    /// The map lock is held across `load`, which makes the populate
    /// atomic: concurrent callers for the same path observe one object.
    /// `load` returning `Ok(None)` (no such record) leaves the cache
    /// untouched.
    pub fn get_or_try_populate<F>(&self, path: &CollectionPath, load: F) -> Result<Option<Arc<Collection>>>
    where
        F: FnOnce() -> Result<Option<Collection>>,
    {
        if let Some(hit) = self.get(path) {
            return Ok(Some(hit));
        }
        let mut map = self.map.write();
        if let Some(hit) = map.get(path) {
            return Ok(Some(hit.clone()));
        }
        match load()? {
            Some(loaded) => {
                let arc = Arc::new(loaded);
                map.insert(path.clone(), Arc::clone(&arc));
                Ok(Some(arc))
            }
            None => Ok(None),
        }
    }

    /// Drop the binding for a removed or renamed path.
    pub fn invalidate(&self, path: &CollectionPath) {
        trace!(path = %path, "cache invalidate");
        self.map.write().remove(path);
    }

    /// Shutdown teardown: drop every binding.
    pub fn clear(&self) {
        self.map.write().clear();
    }

    /// Number of resident collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
