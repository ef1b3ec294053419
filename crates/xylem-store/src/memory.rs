//! In-memory reference implementations of [`DurableStore`] and
//! [`BlobStore`].
//!
//! A `BTreeMap` plays the role of the B-tree file; an undo log per open
//! transaction makes caller-owned `abort` restore the pre-transaction
//! state byte for byte. This is the backend the test suite runs against;
//! it is deliberately unclever and fully checked.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};
use xylem_error::{Result, XylemError};
use xylem_types::{BlobId, CollectionId, DocumentId};

use crate::key::control_key;
use crate::{BlobStore, DurableStore, Txn};

const NEXT_COLLECTION_ID: &str = "collections.next_id";
const NEXT_DOCUMENT_ID: &str = "documents.next_id";
const FREE_COLLECTION_IDS: &str = "collections.free_ids";
const FREE_DOCUMENT_IDS: &str = "documents.free_ids";

/// One reversible mutation: the key and its value before the mutation.
struct Undo {
    keyb: Vec<u8>,
    prior: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    undo: HashMap<u64, Vec<Undo>>,
}

/// In-memory durable store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_txn: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key currently present (test support).
    #[must_use]
    pub fn all_keys(&self) -> Vec<Vec<u8>> {
        self.inner.lock().map.keys().cloned().collect()
    }

    /// Set `keyb` to `value` (or remove it for `None`), recording the undo
    /// entry for `txn`. All mutation funnels through here.
    fn apply(inner: &mut Inner, txn: Txn, keyb: Vec<u8>, value: Option<Vec<u8>>) {
        let prior = match &value {
            Some(v) => inner.map.insert(keyb.clone(), v.clone()),
            None => inner.map.remove(&keyb),
        };
        inner.undo.entry(txn.id()).or_default().push(Undo { keyb, prior });
    }

    fn read_u32(inner: &Inner, name: &str) -> u32 {
        inner
            .map
            .get(&control_key(name))
            .and_then(|v| v.as_slice().try_into().ok())
            .map(u32::from_be_bytes)
            .unwrap_or(0)
    }

    fn write_u32(inner: &mut Inner, txn: Txn, name: &str, value: u32) {
        Self::apply(inner, txn, control_key(name), Some(value.to_be_bytes().to_vec()));
    }

    fn read_free_list(inner: &Inner, name: &str) -> Vec<u32> {
        inner
            .map
            .get(&control_key(name))
            .and_then(|v| serde_json::from_slice(v).ok())
            .unwrap_or_default()
    }

    fn write_free_list(inner: &mut Inner, txn: Txn, name: &str, list: &[u32]) {
        let bytes = serde_json::to_vec(list).unwrap_or_default();
        Self::apply(inner, txn, control_key(name), Some(bytes));
    }

    /// Pop a freed id, or bump the counter. `kind` names the id space for
    /// the exhaustion error.
    fn alloc_id(&self, txn: Txn, free: &str, next: &str, kind: &'static str) -> Result<u32> {
        let mut inner = self.inner.lock();
        let mut list = Self::read_free_list(&inner, free);
        if let Some(id) = list.pop() {
            Self::write_free_list(&mut inner, txn, free, &list);
            trace!(txn = txn.id(), id, kind, "reusing freed id");
            return Ok(id);
        }
        let current = Self::read_u32(&inner, next);
        let id = current.checked_add(1).ok_or(XylemError::IdExhausted { kind })?;
        Self::write_u32(&mut inner, txn, next, id);
        Ok(id)
    }

    fn push_free(&self, txn: Txn, free: &str, id: u32) {
        let mut inner = self.inner.lock();
        let mut list = Self::read_free_list(&inner, free);
        list.push(id);
        Self::write_free_list(&mut inner, txn, free, &list);
    }
}

impl DurableStore for MemoryStore {
    fn begin(&self) -> Txn {
        Txn::from_raw(self.next_txn.fetch_add(1, Ordering::Relaxed))
    }

    fn commit(&self, txn: Txn) -> Result<()> {
        let mut inner = self.inner.lock();
        let entries = inner.undo.remove(&txn.id()).map_or(0, |u| u.len());
        debug!(txn = txn.id(), entries, "commit");
        Ok(())
    }

    fn abort(&self, txn: Txn) -> Result<()> {
        let mut inner = self.inner.lock();
        let undo = inner.undo.remove(&txn.id()).unwrap_or_default();
        debug!(txn = txn.id(), entries = undo.len(), "abort");
        for entry in undo.into_iter().rev() {
            match entry.prior {
                Some(v) => {
                    inner.map.insert(entry.keyb, v);
                }
                None => {
                    inner.map.remove(&entry.keyb);
                }
            }
        }
        Ok(())
    }

    fn get(&self, keyb: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().map.get(keyb).cloned())
    }

    fn put(&self, txn: Txn, keyb: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::apply(&mut inner, txn, keyb, Some(value));
        Ok(())
    }

    fn remove(&self, txn: Txn, keyb: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::apply(&mut inner, txn, keyb.to_vec(), None);
        Ok(())
    }

    fn range_remove(&self, txn: Txn, prefix: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let doomed: Vec<Vec<u8>> = inner
            .map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let n = doomed.len();
        for keyb in doomed {
            Self::apply(&mut inner, txn, keyb, None);
        }
        Ok(n)
    }

    fn scan_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.lock();
        Ok(inner
            .map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn next_collection_id(&self, txn: Txn) -> Result<CollectionId> {
        let raw = self.alloc_id(txn, FREE_COLLECTION_IDS, NEXT_COLLECTION_ID, "collection")?;
        CollectionId::new(raw).ok_or(XylemError::IdExhausted { kind: "collection" })
    }

    fn next_document_id(&self, txn: Txn) -> Result<DocumentId> {
        let raw = self.alloc_id(txn, FREE_DOCUMENT_IDS, NEXT_DOCUMENT_ID, "document")?;
        DocumentId::new(raw).ok_or(XylemError::IdExhausted { kind: "document" })
    }

    fn free_collection_id(&self, txn: Txn, id: CollectionId) -> Result<()> {
        // Root's id is never recycled; the manager filters it out, and the
        // store enforces it as well.
        if id != CollectionId::ROOT {
            self.push_free(txn, FREE_COLLECTION_IDS, id.get());
        }
        Ok(())
    }

    fn free_document_id(&self, txn: Txn, id: DocumentId) -> Result<()> {
        self.push_free(txn, FREE_DOCUMENT_IDS, id.get());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

struct BlobInner {
    blobs: HashMap<u64, (Vec<u8>, u32)>,
    undo: HashMap<u64, Vec<BlobUndo>>,
}

enum BlobUndo {
    Created(u64),
    Retained(u64),
    Released(u64, Vec<u8>),
}

/// Reference-counted in-memory blob store.
pub struct MemoryBlobStore {
    inner: Mutex<BlobInner>,
    next_id: AtomicU64,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BlobInner {
                blobs: HashMap::new(),
                undo: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of live payloads (test support).
    #[must_use]
    pub fn live_blobs(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    /// Discard rollback state for a finished transaction. The durable
    /// store drives commit/abort; blobs follow the same transaction ids.
    pub fn commit(&self, txn: Txn) {
        self.inner.lock().undo.remove(&txn.id());
    }

    /// Undo blob effects of an aborted transaction.
    pub fn abort(&self, txn: Txn) {
        let mut inner = self.inner.lock();
        let undo = inner.undo.remove(&txn.id()).unwrap_or_default();
        for entry in undo.into_iter().rev() {
            match entry {
                BlobUndo::Created(id) => {
                    inner.blobs.remove(&id);
                }
                BlobUndo::Retained(id) => {
                    if let Some((_, rc)) = inner.blobs.get_mut(&id) {
                        *rc -= 1;
                    }
                }
                BlobUndo::Released(id, data) => {
                    inner.blobs.entry(id).or_insert((data, 0)).1 += 1;
                }
            }
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, txn: Txn, data: Vec<u8>) -> Result<BlobId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.blobs.insert(id, (data, 1));
        inner.undo.entry(txn.id()).or_default().push(BlobUndo::Created(id));
        Ok(BlobId(id))
    }

    fn get(&self, id: BlobId) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().blobs.get(&id.0).map(|(d, _)| d.clone()))
    }

    fn retain(&self, txn: Txn, id: BlobId) -> Result<BlobId> {
        let mut inner = self.inner.lock();
        let Some((_, rc)) = inner.blobs.get_mut(&id.0) else {
            return Err(XylemError::Corrupt {
                key: id.to_string(),
                detail: "retain of unknown blob".to_string(),
            });
        };
        *rc += 1;
        inner.undo.entry(txn.id()).or_default().push(BlobUndo::Retained(id.0));
        Ok(id)
    }

    fn remove(&self, txn: Txn, id: BlobId) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some((data, rc)) = inner.blobs.get_mut(&id.0) else {
            // Double-dereference is tolerated; move cleanup may race a
            // concurrent remove of the same destination.
            return Ok(());
        };
        *rc -= 1;
        if *rc == 0 {
            let data = data.clone();
            inner.blobs.remove(&id.0);
            inner
                .undo
                .entry(txn.id())
                .or_default()
                .push(BlobUndo::Released(id.0, data));
        } else {
            let released = data.clone();
            inner
                .undo
                .entry(txn.id())
                .or_default()
                .push(BlobUndo::Released(id.0, released));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{collection_key, document_key, document_prefix};
    use xylem_types::{CollectionPath, ResourceType};

    fn cid(n: u32) -> CollectionId {
        CollectionId::new(n).unwrap()
    }

    fn did(n: u32) -> DocumentId {
        DocumentId::new(n).unwrap()
    }

    #[test]
    fn put_get_remove() {
        let store = MemoryStore::new();
        let txn = store.begin();
        let k = collection_key(&CollectionPath::root());
        store.put(txn, k.clone(), b"root".to_vec()).unwrap();
        assert_eq!(store.get(&k).unwrap().as_deref(), Some(&b"root"[..]));
        store.remove(txn, &k).unwrap();
        assert_eq!(store.get(&k).unwrap(), None);
        store.commit(txn).unwrap();
    }

    #[test]
    fn abort_restores_prior_state() {
        let store = MemoryStore::new();
        let setup = store.begin();
        let k = collection_key(&CollectionPath::root());
        store.put(setup, k.clone(), b"v1".to_vec()).unwrap();
        store.commit(setup).unwrap();

        let txn = store.begin();
        store.put(txn, k.clone(), b"v2".to_vec()).unwrap();
        let k2 = collection_key(&CollectionPath::normalize("/db/x").unwrap());
        store.put(txn, k2.clone(), b"new".to_vec()).unwrap();
        store.remove(txn, &k).unwrap();
        store.abort(txn).unwrap();

        assert_eq!(store.get(&k).unwrap().as_deref(), Some(&b"v1"[..]));
        assert_eq!(store.get(&k2).unwrap(), None);
    }

    #[test]
    fn range_remove_is_prefix_scoped() {
        let store = MemoryStore::new();
        let txn = store.begin();
        store
            .put(txn, document_key(cid(3), ResourceType::Xml, did(1)), vec![1])
            .unwrap();
        store
            .put(txn, document_key(cid(3), ResourceType::Binary, did(2)), vec![2])
            .unwrap();
        store
            .put(txn, document_key(cid(4), ResourceType::Xml, did(3)), vec![3])
            .unwrap();
        let n = store.range_remove(txn, &document_prefix(cid(3))).unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.scan_keys(&document_prefix(cid(3))).unwrap().len(), 0);
        assert_eq!(store.scan_keys(&document_prefix(cid(4))).unwrap().len(), 1);
    }

    #[test]
    fn freed_ids_are_reused_and_root_is_not() {
        let store = MemoryStore::new();
        let txn = store.begin();
        let a = store.next_collection_id(txn).unwrap();
        let b = store.next_collection_id(txn).unwrap();
        assert_eq!(a, CollectionId::ROOT);
        assert_eq!(b.get(), 2);
        store.free_collection_id(txn, b).unwrap();
        assert_eq!(store.next_collection_id(txn).unwrap(), b);
        store.free_collection_id(txn, a).unwrap();
        // Root id must not come back out of the free list.
        assert_eq!(store.next_collection_id(txn).unwrap().get(), 3);
    }

    #[test]
    fn id_allocation_rolls_back_on_abort() {
        let store = MemoryStore::new();
        let t1 = store.begin();
        let a = store.next_collection_id(t1).unwrap();
        store.commit(t1).unwrap();

        let t2 = store.begin();
        let b = store.next_collection_id(t2).unwrap();
        assert_ne!(a, b);
        store.abort(t2).unwrap();

        let t3 = store.begin();
        assert_eq!(store.next_collection_id(t3).unwrap(), b);
    }

    #[test]
    fn blob_refcounting() {
        let blobs = MemoryBlobStore::new();
        let store = MemoryStore::new();
        let txn = store.begin();
        let id = blobs.put(txn, b"payload".to_vec()).unwrap();
        let same = blobs.retain(txn, id).unwrap();
        assert_eq!(same, id);
        blobs.remove(txn, id).unwrap();
        assert_eq!(blobs.get(id).unwrap().as_deref(), Some(&b"payload"[..]));
        blobs.remove(txn, id).unwrap();
        assert_eq!(blobs.get(id).unwrap(), None);
        assert_eq!(blobs.live_blobs(), 0);
    }

    mod model {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Put(u8, Vec<u8>),
            Remove(u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (any::<u8>(), prop::collection::vec(any::<u8>(), 0..8))
                    .prop_map(|(k, v)| Op::Put(k, v)),
                any::<u8>().prop_map(Op::Remove),
            ]
        }

        proptest! {
            // Any committed sequence of writes agrees with a plain map,
            // and aborting a second sequence restores the committed view.
            #[test]
            fn random_writes_track_a_model_and_abort_is_total(
                committed in prop::collection::vec(op(), 0..32),
                discarded in prop::collection::vec(op(), 0..32),
            ) {
                let store = MemoryStore::new();
                let mut model = std::collections::BTreeMap::new();

                let t1 = store.begin();
                for o in &committed {
                    match o {
                        Op::Put(k, v) => {
                            store.put(t1, vec![*k], v.clone()).unwrap();
                            model.insert(vec![*k], v.clone());
                        }
                        Op::Remove(k) => {
                            store.remove(t1, &[*k]).unwrap();
                            model.remove(&vec![*k]);
                        }
                    }
                }
                store.commit(t1).unwrap();

                let t2 = store.begin();
                for o in &discarded {
                    match o {
                        Op::Put(k, v) => store.put(t2, vec![*k], v.clone()).unwrap(),
                        Op::Remove(k) => store.remove(t2, &[*k]).unwrap(),
                    }
                }
                store.abort(t2).unwrap();

                for (k, v) in &model {
                    let got = store.get(k).unwrap();
                    prop_assert_eq!(got.as_ref(), Some(v));
                }
                prop_assert_eq!(store.scan_keys(&[]).unwrap().len(), model.len());
            }
        }
    }
}
