//! Collection and document value types.
//!
//! A [`Collection`] is a plain value. Mutation happens on a clone that is
//! persisted and then swapped into the cache, always under the write lock
//! on the collection's path; the lock manager guarantees a single writer,
//! so readers holding an older `Arc` see a consistent (if slightly stale)
//! snapshot, never a torn one.
//!
//! On disk a collection is two things: one [`CollectionRecord`] under the
//! path key, and one document record per owned document under
//! `(collection id, resource type, document id)` keys. The in-memory
//! [`Collection`] carries both joined together; [`Collection::to_record`]
//! and [`Collection::from_record`] convert at the store boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use xylem_types::{
    CollectionId, CollectionPath, ContentRef, DocumentId, Permission, ResourceType,
};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Metadata of one document owned by a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Name, unique within the owning collection.
    pub name: String,
    pub collection_id: CollectionId,
    pub resource_type: ResourceType,
    pub permission: Permission,
    pub created_ms: u64,
    pub modified_ms: u64,
    /// Where the content lives; opaque to the namespace layer.
    pub content: ContentRef,
}

impl Document {
    /// The document's full path, derived from its owning collection.
    #[must_use]
    pub fn path_under(&self, collection: &CollectionPath) -> String {
        format!("{}/{}", collection.as_str(), self.name)
    }
}

/// The persisted part of a collection (document records live separately).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: CollectionId,
    pub path: CollectionPath,
    pub parent: Option<CollectionPath>,
    pub permission: Permission,
    pub created_ms: u64,
    pub children: BTreeSet<String>,
}

/// An in-memory collection: record plus its owned documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: CollectionId,
    pub path: CollectionPath,
    /// `None` only for the namespace root.
    pub parent: Option<CollectionPath>,
    pub permission: Permission,
    pub created_ms: u64,
    /// Names of direct child collections.
    pub children: BTreeSet<String>,
    /// Owned documents by name.
    pub documents: BTreeMap<String, Document>,
}

impl Collection {
    /// Create a fresh, empty collection.
    #[must_use]
    pub fn new(id: CollectionId, path: CollectionPath, permission: Permission) -> Self {
        let parent = path.parent();
        Self {
            id,
            path,
            parent,
            permission,
            created_ms: now_ms(),
            children: BTreeSet::new(),
            documents: BTreeMap::new(),
        }
    }

    /// No child collections and no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.documents.is_empty()
    }

    #[must_use]
    pub fn has_child(&self, name: &str) -> bool {
        self.children.contains(name)
    }

    #[must_use]
    pub fn has_document(&self, name: &str) -> bool {
        self.documents.contains_key(name)
    }

    /// Register a direct child collection by name.
    pub fn add_child(&mut self, name: &str) {
        self.children.insert(name.to_string());
    }

    /// Unregister a direct child collection. Returns whether it was known.
    pub fn remove_child(&mut self, name: &str) -> bool {
        self.children.remove(name)
    }

    pub fn add_document(&mut self, doc: Document) {
        self.documents.insert(doc.name.clone(), doc);
    }

    pub fn remove_document(&mut self, name: &str) -> Option<Document> {
        self.documents.remove(name)
    }

    /// Rewrite path and parent for a move. Children names and documents
    /// stay; document store keys are id-based and unaffected.
    pub fn relabel(&mut self, new_path: CollectionPath) {
        self.parent = new_path.parent();
        self.path = new_path;
    }

    /// Split into the persisted record.
    #[must_use]
    pub fn to_record(&self) -> CollectionRecord {
        CollectionRecord {
            id: self.id,
            path: self.path.clone(),
            parent: self.parent.clone(),
            permission: self.permission.clone(),
            created_ms: self.created_ms,
            children: self.children.clone(),
        }
    }

    /// Rejoin a record with its loaded document metadata.
    #[must_use]
    pub fn from_record(record: CollectionRecord, documents: Vec<Document>) -> Self {
        Self {
            id: record.id,
            path: record.path,
            parent: record.parent,
            permission: record.permission,
            created_ms: record.created_ms,
            children: record.children,
            documents: documents.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }
}
