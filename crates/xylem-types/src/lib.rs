//! Core identifier and value types shared across the Xylem storage crates.
//!
//! Everything in here is a plain value: no locks, no I/O. The heavier
//! machinery (store contract, lock manager, namespace manager) lives in
//! `xylem-store` and `xylem-core` and builds on these types.

pub mod path;
pub mod permission;

pub use path::CollectionPath;
pub use permission::{Access, AclEntry, AclTarget, Permission, Subject};

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A collection identifier.
///
/// Ids are 1-based; 0 is reserved as the "unknown id" sentinel in the
/// persistent counter records and therefore does not exist as a live id.
/// The root collection always holds id 1 and its id is never freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CollectionId(NonZeroU32);

impl CollectionId {
    /// The root collection's id.
    pub const ROOT: Self = Self(NonZeroU32::MIN);

    /// Create an id from a raw u32. Returns `None` for 0.
    #[inline]
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Raw u32 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document identifier, unique across the whole database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DocumentId(NonZeroU32);

impl DocumentId {
    /// Create an id from a raw u32. Returns `None` for 0.
    #[inline]
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Raw u32 value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a binary document's content in the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlobId(pub u64);

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{:016x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lock modes and resource kinds
// ---------------------------------------------------------------------------

/// Lock mode requested on a collection or document path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// No lock taken; the caller only wants a point-in-time snapshot.
    None,
    /// Shared read lock.
    Read,
    /// Exclusive write lock. By convention a write lock on a collection
    /// path protects its entire subtree against structural change.
    Write,
}

/// The two kinds of document a collection can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// Structured XML document; the node tree lives in the DOM store.
    Xml,
    /// Opaque binary document; the payload lives in the blob store.
    Binary,
}

impl ResourceType {
    /// Stable one-byte tag used in document store keys.
    #[inline]
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            ResourceType::Xml => 0,
            ResourceType::Binary => 1,
        }
    }
}

/// Whether a copy carries source ownership and timestamps to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreserveMode {
    /// Newly created targets take owner/group/mode/ACL/creation-time from
    /// the source. Pre-existing targets keep their own ownership.
    Preserve,
    /// Targets get the default attributes of the copying principal.
    NoPreserve,
}

/// Reference to a document's content, opaque to the namespace layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentRef {
    /// Root node address inside the DOM store.
    Xml { node_root: u64 },
    /// Blob handle in the blob store.
    Blob(BlobId),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_collection_id() {
        assert!(CollectionId::new(0).is_none());
        assert_eq!(CollectionId::new(1), Some(CollectionId::ROOT));
    }

    #[test]
    fn resource_type_tags_are_stable() {
        assert_eq!(ResourceType::Xml.tag(), 0);
        assert_eq!(ResourceType::Binary.tag(), 1);
    }
}
