//! Durable store contract for the Xylem namespace layer.
//!
//! The namespace manager persists collection and document records through
//! the [`DurableStore`] trait and binary payloads through [`BlobStore`].
//! Both are narrow seams: the production backends (B-tree file store,
//! journalled blob store) live elsewhere; this crate ships the contracts,
//! the key encoding, the record codec and in-memory reference
//! implementations used by the test suite.
//!
//! Every mutating call takes a [`Txn`]. Commit and abort are owned by the
//! caller; the namespace layer only groups writes under the handle it was
//! given.

pub mod codec;
pub mod key;
pub mod memory;

pub use memory::{MemoryBlobStore, MemoryStore};

use xylem_error::Result;
use xylem_types::{BlobId, CollectionId, DocumentId};

// ---------------------------------------------------------------------------
// Transaction handle
// ---------------------------------------------------------------------------

/// Opaque transaction handle threaded through every mutating store call.
///
/// The handle groups writes for journaling and rollback. It is not a
/// guard: dropping it neither commits nor aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Txn {
    id: u64,
}

impl Txn {
    #[inline]
    #[must_use]
    pub fn id(self) -> u64 {
        self.id
    }

    /// Construct a handle from a raw id. Backends allocate ids; this is
    /// public so alternative backends can mint handles.
    #[inline]
    #[must_use]
    pub fn from_raw(id: u64) -> Self {
        Self { id }
    }
}

// ---------------------------------------------------------------------------
// DurableStore
// ---------------------------------------------------------------------------

/// Byte-keyed durable store with id allocation.
///
/// Collection records are keyed by their normalized path (see
/// [`key::collection_key`]); document records by
/// `(collection id, resource type, document id)`. The id counters are
/// store-internal shared state: implementations serialize counter access
/// themselves, callers hold no lock for them.
pub trait DurableStore: Send + Sync {
    /// Begin a transaction. Commit/abort stay with the caller.
    fn begin(&self) -> Txn;

    /// Make every write under `txn` durable.
    fn commit(&self, txn: Txn) -> Result<()>;

    /// Roll back every write performed under `txn`.
    fn abort(&self, txn: Txn) -> Result<()>;

    /// Point lookup.
    fn get(&self, keyb: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or replace.
    fn put(&self, txn: Txn, keyb: Vec<u8>, value: Vec<u8>) -> Result<()>;

    /// Remove a single key. Removing an absent key is not an error.
    fn remove(&self, txn: Txn, keyb: &[u8]) -> Result<()>;

    /// Remove every key with the given prefix; returns how many.
    fn range_remove(&self, txn: Txn, prefix: &[u8]) -> Result<usize>;

    /// All keys with the given prefix, in lexicographic order.
    fn scan_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Allocate a collection id, reusing freed ids first.
    fn next_collection_id(&self, txn: Txn) -> Result<CollectionId>;

    /// Allocate a document id, reusing freed ids first.
    fn next_document_id(&self, txn: Txn) -> Result<DocumentId>;

    /// Return a collection id to the free list. Deferred by callers until
    /// the owning record is fully unlinked.
    fn free_collection_id(&self, txn: Txn, id: CollectionId) -> Result<()>;

    /// Return a document id to the free list.
    fn free_document_id(&self, txn: Txn, id: DocumentId) -> Result<()>;
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Physical storage for binary document payloads.
///
/// Copies are cheap (reference counted in the memory implementation);
/// `remove` drops one reference and reclaims the payload when the count
/// hits zero.
pub trait BlobStore: Send + Sync {
    /// Store a payload, returning its handle.
    fn put(&self, txn: Txn, data: Vec<u8>) -> Result<BlobId>;

    /// Fetch a payload.
    fn get(&self, id: BlobId) -> Result<Option<Vec<u8>>>;

    /// Add a reference to an existing payload (used by copy).
    fn retain(&self, txn: Txn, id: BlobId) -> Result<BlobId>;

    /// Drop a reference; reclaims storage on the last one.
    fn remove(&self, txn: Txn, id: BlobId) -> Result<()>;
}
