//! The namespace manager: orchestration of cache, locks, store and
//! triggers for every structural operation.
//!
//! # Locking protocol
//!
//! One global rule prevents deadlock: locks are acquired ancestor before
//! descendant, and multi-node operations (move, copy) take their whole
//! collection lock set in a single pass ordered by [`ordered_paths`]
//! before the first mutation. A write lock on a collection path covers
//! its subtree by convention, so descendants are never separately locked
//! for structural change. Only documents get their own locks, and those
//! are also taken up front in one deterministic top-down, left-to-right
//! pass.
//!
//! # Cache discipline
//!
//! The cache is consulted under at least a read lock on the path and
//! mutated under the write lock on the path or on an ancestor (subtree
//! convention). Resolution is two-phase: an optimistic read-locked peek,
//! then, on miss, the pessimistic parent write lock with a re-check
//! before creating; the re-check is what makes racing creators converge
//! on a single winner.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};
use xylem_error::{Result, XylemError};
use xylem_store::{BlobStore, DurableStore, Txn, codec, key};
use xylem_types::path::ROOT_SENTINEL;
use xylem_types::{
    Access, CollectionPath, ContentRef, LockMode, Permission, PreserveMode, ResourceType, Subject,
};

use crate::cache::CollectionCache;
use crate::collection::{Collection, CollectionRecord, Document, now_ms};
use crate::config::NamespaceConfig;
use crate::handle::CollectionHandle;
use crate::index::{IndexController, NoopIndexController};
use crate::lock::{PathLockManager, ordered_paths};
use crate::triggers::TriggerChain;

/// Orchestrates the collection namespace over a durable store.
pub struct NamespaceManager {
    store: Arc<dyn DurableStore>,
    blobs: Arc<dyn BlobStore>,
    locks: Arc<PathLockManager>,
    cache: CollectionCache,
    triggers: TriggerChain,
    index: Arc<dyn IndexController>,
    config: NamespaceConfig,
}

impl NamespaceManager {
    /// Build a manager with an empty cache and default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            locks: Arc::new(PathLockManager::new()),
            cache: CollectionCache::new(),
            triggers: TriggerChain::new(),
            index: Arc::new(NoopIndexController),
            config: NamespaceConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: NamespaceConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_triggers(mut self, triggers: TriggerChain) -> Self {
        self.triggers = triggers;
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn IndexController>) -> Self {
        self.index = index;
        self
    }

    /// The path lock manager (shared with document-level callers).
    #[must_use]
    pub fn locks(&self) -> &Arc<PathLockManager> {
        &self.locks
    }

    /// The collection cache (read-mostly; tests inspect residency).
    #[must_use]
    pub fn cache(&self) -> &CollectionCache {
        &self.cache
    }

    /// Shutdown teardown: every binding is dropped.
    pub fn shutdown(&self) {
        self.cache.clear();
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    fn normalize(raw: &str) -> Result<CollectionPath> {
        CollectionPath::normalize(raw)
            .ok_or_else(|| XylemError::conflict(format!("invalid collection path '{raw}'")))
    }

    fn denied(
        subject: &Subject,
        access: &'static str,
        path: &CollectionPath,
        detail: &str,
    ) -> XylemError {
        XylemError::PermissionDenied {
            subject: subject.name.clone(),
            access,
            path: path.clone(),
            detail: detail.to_string(),
        }
    }

    fn check(
        subject: &Subject,
        permission: &Permission,
        access: Access,
        access_name: &'static str,
        path: &CollectionPath,
        detail: &str,
    ) -> Result<()> {
        if permission.validate(subject, access) {
            Ok(())
        } else {
            Err(Self::denied(subject, access_name, path, detail))
        }
    }

    /// Load a collection record plus its document metadata from the store.
    fn load_from_store(&self, path: &CollectionPath) -> Result<Option<Collection>> {
        let keyb = key::collection_key(path);
        let Some(bytes) = self.store.get(&keyb)? else {
            return Ok(None);
        };
        let record: CollectionRecord = codec::decode(&keyb, &bytes)?;
        let mut documents = Vec::new();
        for doc_key in self.store.scan_keys(&key::document_prefix(record.id))? {
            let Some(doc_bytes) = self.store.get(&doc_key)? else {
                continue;
            };
            documents.push(codec::decode::<Document>(&doc_key, &doc_bytes)?);
        }
        Ok(Some(Collection::from_record(record, documents)))
    }

    /// Cache-or-store resolution. Caller holds the appropriate path lock.
    fn resolve(&self, path: &CollectionPath) -> Result<Option<Arc<Collection>>> {
        self.cache.get_or_try_populate(path, || self.load_from_store(path))
    }

    /// Write a collection record through the store and re-bind the cache.
    fn persist(&self, txn: Txn, collection: Collection) -> Result<Arc<Collection>> {
        let record = collection.to_record();
        self.store
            .put(txn, key::collection_key(&collection.path), codec::encode(&record)?)?;
        let arc = Arc::new(collection);
        self.cache.insert(Arc::clone(&arc));
        Ok(arc)
    }

    fn persist_document(&self, txn: Txn, doc: &Document) -> Result<()> {
        self.store.put(
            txn,
            key::document_key(doc.collection_id, doc.resource_type, doc.id),
            codec::encode(doc)?,
        )
    }

    // -----------------------------------------------------------------------
    // get-or-create
    // -----------------------------------------------------------------------

    /// Resolve `raw`, creating every missing collection along the way.
    pub fn get_or_create_collection(
        &self,
        txn: Txn,
        subject: &Subject,
        raw: &str,
    ) -> Result<Arc<Collection>> {
        self.get_or_create_collection_explicit(txn, subject, raw)
            .map(|(_, c)| c)
    }

    /// Like [`get_or_create_collection`] but reports whether the target
    /// itself was created by this call.
    ///
    /// [`get_or_create_collection`]: NamespaceManager::get_or_create_collection
    pub fn get_or_create_collection_explicit(
        &self,
        txn: Txn,
        subject: &Subject,
        raw: &str,
    ) -> Result<(bool, Arc<Collection>)> {
        let path = Self::normalize(raw)?;

        // Optimistic fast path: a resident target is by definition already
        // consistent, no further locking needed.
        {
            let _read = self.locks.acquire_read(path.as_str());
            if let Some(hit) = self.cache.get(&path) {
                return Ok((false, hit));
            }
        }

        // Pessimistic: resolve every prefix root-down so lock acquisition
        // runs ancestor before descendant. Explicit iteration, not native
        // recursion; collection trees have unbounded depth.
        let mut last = None;
        for prefix in path.prefixes() {
            last = Some(self.resolve_or_create_node(txn, subject, &prefix)?);
        }
        last.ok_or_else(|| XylemError::conflict(format!("empty collection path '{raw}'")))
    }

    /// Resolve or create a single node. Ancestors are already resolved.
    fn resolve_or_create_node(
        &self,
        txn: Txn,
        subject: &Subject,
        path: &CollectionPath,
    ) -> Result<(bool, Arc<Collection>)> {
        {
            let _read = self.locks.acquire_read(path.as_str());
            if let Some(hit) = self.cache.get(path) {
                return Ok((false, hit));
            }
        }

        // The parent write lock covers `path` by the subtree convention;
        // the root's synthetic parent is a fixed sentinel.
        let parent_path = path.parent();
        let parent_lock_name = parent_path
            .as_ref()
            .map_or(ROOT_SENTINEL, CollectionPath::as_str)
            .to_string();
        let _parent_write = self.locks.acquire_write(&parent_lock_name);

        // Double-check: another thread may have populated the binding
        // between the optimistic peek and this lock.
        if let Some(hit) = self.cache.get(path) {
            return Ok((false, hit));
        }
        if let Some(loaded) = self.resolve(path)? {
            return Ok((false, loaded));
        }

        let Some(parent_path) = parent_path else {
            return self.create_root(txn);
        };
        let parent = self.resolve(&parent_path)?.ok_or_else(|| {
            XylemError::conflict(format!("parent '{parent_path}' vanished during create"))
        })?;

        let name = path.last_segment();
        Self::check(
            subject,
            &parent.permission,
            Access::WRITE,
            "write",
            &parent_path,
            "create child collection",
        )?;
        Self::check(
            subject,
            &parent.permission,
            Access::EXECUTE,
            "execute",
            &parent_path,
            "create child collection",
        )?;
        if parent.has_document(name) {
            return Err(XylemError::conflict(format!(
                "collection '{parent_path}' already owns a document named '{name}'"
            )));
        }
        if parent.has_child(name) {
            // The parent lists the child but the store has no record.
            // Recreate rather than fail.
            warn!(path = %path, "child listed in parent but missing from store; recreating");
        }

        self.triggers.before_create(txn, path)?;

        let id = self.store.next_collection_id(txn)?;
        let mut permission = Permission::collection_default(subject);
        if parent.permission.is_setgid() {
            permission.group = parent.permission.group.clone();
            permission.mode |= xylem_types::permission::MODE_SETGID;
        }
        let child = self.persist(txn, Collection::new(id, path.clone(), permission))?;

        let mut linked = (*parent).clone();
        linked.add_child(name);
        self.persist(txn, linked)?;

        self.triggers.after_create(txn, &child)?;
        debug!(path = %path, id = %child.id, "created collection");
        Ok((true, child))
    }

    /// Create the namespace root and import the seed configuration.
    fn create_root(&self, txn: Txn) -> Result<(bool, Arc<Collection>)> {
        let path = CollectionPath::root();
        self.triggers.before_create(txn, &path)?;

        let system = Subject::system();
        let id = self.store.next_collection_id(txn)?;
        let root = self.persist(
            txn,
            Collection::new(id, path.clone(), Permission::collection_default(&system)),
        )?;
        self.triggers.after_create(txn, &root)?;
        info!(id = %root.id, "created root collection");

        let root = match &self.config.seed_config {
            Some(seed) => self.import_seed_config(txn, &system, &root, seed.clone())?,
            None => root,
        };
        Ok((true, root))
    }

    /// Store the seed configuration as a document of the fresh root. The
    /// DOM store is external, so the payload is parked in the blob store.
    fn import_seed_config(
        &self,
        txn: Txn,
        system: &Subject,
        root: &Arc<Collection>,
        seed: String,
    ) -> Result<Arc<Collection>> {
        let blob = self.blobs.put(txn, seed.into_bytes())?;
        let now = now_ms();
        let doc = Document {
            id: self.store.next_document_id(txn)?,
            name: self.config.seed_config_name.clone(),
            collection_id: root.id,
            resource_type: ResourceType::Xml,
            permission: Permission::document_default(system),
            created_ms: now,
            modified_ms: now,
            content: ContentRef::Blob(blob),
        };
        self.persist_document(txn, &doc)?;
        let mut seeded = (**root).clone();
        seeded.add_document(doc);
        let arc = self.persist(txn, seeded)?;
        debug!(name = %self.config.seed_config_name, "imported seed configuration");
        Ok(arc)
    }

    // -----------------------------------------------------------------------
    // open
    // -----------------------------------------------------------------------

    /// Open `raw` under `mode`, without creating. `None` when the path
    /// does not resolve; the lock is released before returning, so no
    /// dangling lock is left on a non-existent path.
    pub fn open_collection(
        &self,
        subject: &Subject,
        raw: &str,
        mode: LockMode,
    ) -> Result<Option<CollectionHandle>> {
        let path = Self::normalize(raw)?;
        let guard = match mode {
            LockMode::None => None,
            LockMode::Read => Some(self.locks.acquire_read(path.as_str())),
            LockMode::Write => Some(self.locks.acquire_write(path.as_str())),
        };

        let Some(collection) = self.resolve(&path)? else {
            // Guard drops here; a miss must not leave the path locked.
            return Ok(None);
        };

        Self::check(
            subject,
            &collection.permission,
            Access::EXECUTE,
            "execute",
            &path,
            "open collection",
        )?;

        // Re-derive and re-authorize every ancestor. The lock on `path`
        // only serializes structural change; it does not prove the caller
        // may still traverse the ancestors, whose permissions can have
        // changed since any earlier call.
        let prefixes = path.prefixes();
        for ancestor in &prefixes[..prefixes.len().saturating_sub(1)] {
            let anc = self.resolve(ancestor)?.ok_or_else(|| XylemError::Corrupt {
                key: ancestor.as_str().to_string(),
                detail: format!("ancestor of existing collection '{path}' is missing"),
            })?;
            Self::check(
                subject,
                &anc.permission,
                Access::EXECUTE,
                "execute",
                ancestor,
                "traverse ancestor",
            )?;
        }

        Ok(Some(CollectionHandle::new(collection, guard)))
    }

    // -----------------------------------------------------------------------
    // save / find
    // -----------------------------------------------------------------------

    /// Persist metadata-only changes: collection record and document
    /// records, cache re-bound, no structural event, no triggers. Store
    /// records of documents no longer listed by `collection` are
    /// dropped, their ids freed and their payloads dereferenced, so a
    /// cold reload reproduces exactly what was saved. The caller holds
    /// the write lock on the collection's path.
    pub fn save_collection(&self, txn: Txn, collection: &Collection) -> Result<Arc<Collection>> {
        let live: BTreeSet<Vec<u8>> = collection
            .documents
            .values()
            .map(|doc| key::document_key(doc.collection_id, doc.resource_type, doc.id))
            .collect();
        for doc_key in self.store.scan_keys(&key::document_prefix(collection.id))? {
            if live.contains(&doc_key) {
                continue;
            }
            if let Some(bytes) = self.store.get(&doc_key)? {
                let stale: Document = codec::decode(&doc_key, &bytes)?;
                if let ContentRef::Blob(blob) = stale.content {
                    self.blobs.remove(txn, blob)?;
                }
                self.store.free_document_id(txn, stale.id)?;
            }
            self.store.remove(txn, &doc_key)?;
        }
        for doc in collection.documents.values() {
            self.persist_document(txn, doc)?;
        }
        self.persist(txn, collection.clone())
    }

    /// Linear scan of collection keys against a regex. Bypasses the
    /// cache; explicitly a slow path.
    pub fn find_collections_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(pattern)
            .map_err(|e| XylemError::conflict(format!("invalid pattern '{pattern}': {e}")))?;
        let mut out = Vec::new();
        for keyb in self.store.scan_keys(&[key::TAG_COLLECTION])? {
            if let Some(path) = key::collection_path_from_key(&keyb) {
                if re.is_match(path.as_str()) {
                    out.push(path.as_str().to_string());
                }
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // move
    // -----------------------------------------------------------------------

    /// Move the collection at `src_raw` under `dest_parent_raw` as
    /// `new_name`, replacing any collection already there.
    pub fn move_collection(
        &self,
        txn: Txn,
        subject: &Subject,
        src_raw: &str,
        dest_parent_raw: &str,
        new_name: &str,
    ) -> Result<()> {
        let src = Self::normalize(src_raw)?;
        let dest_parent = Self::normalize(dest_parent_raw)?;
        if !CollectionPath::is_single_segment(new_name) {
            return Err(XylemError::conflict(format!(
                "new collection name '{new_name}' must be a single path segment"
            )));
        }
        if src.is_root() {
            return Err(XylemError::conflict("cannot move the root collection"));
        }
        let dst = dest_parent.child(new_name);
        if src == dst {
            return Err(XylemError::conflict(format!("cannot move '{src}' onto itself")));
        }
        if src == dest_parent || src.is_ancestor_of(&dest_parent) {
            return Err(XylemError::conflict(format!(
                "cannot move '{src}' into its own subtree '{dest_parent}'"
            )));
        }
        let src_parent = src.parent().unwrap_or_else(CollectionPath::root);

        // Whole collection lock set in one deterministic pass.
        let lock_set = ordered_paths(&[&src_parent, &src, &dest_parent]);
        let _guards: Vec<_> = lock_set
            .iter()
            .map(|p| self.locks.acquire_write(p.as_str()))
            .collect();

        let source = self
            .resolve(&src)?
            .ok_or_else(|| XylemError::conflict(format!("no such collection '{src}'")))?;
        let target_parent = self
            .resolve(&dest_parent)?
            .ok_or_else(|| XylemError::conflict(format!("no such collection '{dest_parent}'")))?;
        if source.id == target_parent.id {
            return Err(XylemError::conflict(format!("cannot move '{src}' into itself")));
        }
        let source_parent = self.resolve(&src_parent)?.ok_or_else(|| XylemError::Corrupt {
            key: src_parent.as_str().to_string(),
            detail: "parent of existing collection is missing".to_string(),
        })?;

        Self::check(subject, &source_parent.permission, Access::WRITE, "write", &src_parent, "unlink moved collection")?;
        Self::check(subject, &source_parent.permission, Access::EXECUTE, "execute", &src_parent, "unlink moved collection")?;
        Self::check(subject, &target_parent.permission, Access::WRITE, "write", &dest_parent, "link moved collection")?;
        Self::check(subject, &target_parent.permission, Access::EXECUTE, "execute", &dest_parent, "link moved collection")?;
        Self::check(subject, &source.permission, Access::WRITE, "write", &src, "move collection")?;

        // A collection already at the destination is fully removed first;
        // its blobs are dereferenced inside the removal. Failure aborts
        // the whole move.
        if self.resolve(&dst)?.is_some() {
            info!(dst = %dst, "destination exists; removing before move");
            if !self.remove_collection(txn, subject, dst.as_str())? {
                return Err(XylemError::LockFailure {
                    mode: "write",
                    path: dst.as_str().to_string(),
                });
            }
        }

        // Document lock set: every document in the source subtree plus
        // its destination path, acquired up front, top-down and
        // left-to-right. Incremental locking during the walk could
        // deadlock against a copy/move touching an overlapping
        // destination.
        let mut doc_guards = Vec::new();
        let mut walk = VecDeque::from([(src.clone(), dst.clone())]);
        while let Some((old, new)) = walk.pop_front() {
            let col = self.resolve(&old)?.ok_or_else(|| XylemError::Corrupt {
                key: old.as_str().to_string(),
                detail: "subtree member vanished during move".to_string(),
            })?;
            for name in col.documents.keys() {
                doc_guards.push(
                    self.locks
                        .acquire_document_write(&format!("{}/{}", old.as_str(), name)),
                );
                doc_guards.push(
                    self.locks
                        .acquire_document_write(&format!("{}/{}", new.as_str(), name)),
                );
            }
            for child in &col.children {
                walk.push_back((old.child(child), new.child(child)));
            }
        }

        self.triggers.before_move(txn, &source, &dst)?;

        // Unlink from the old parent before relabeling, so a crash can
        // never leave the subtree reachable under two names.
        let mut unlinked = (*source_parent).clone();
        unlinked.remove_child(src.last_segment());
        self.persist(txn, unlinked)?;

        // Relabel the top node and link it into the new parent.
        let moved = self.relabel_node(txn, &src, &dst)?;
        let fresh_parent = self.resolve(&dest_parent)?.unwrap_or(target_parent);
        let mut linked = (*fresh_parent).clone();
        linked.add_child(new_name);
        self.persist(txn, linked)?;

        // Descendants keep their names; only path and store key change.
        let mut work = VecDeque::new();
        for child in &moved.children {
            work.push_back((src.child(child), dst.child(child)));
        }
        while let Some((old, new)) = work.pop_front() {
            let node = self.relabel_node(txn, &old, &new)?;
            for child in &node.children {
                work.push_back((old.child(child), new.child(child)));
            }
        }

        self.triggers.after_move(txn, &moved, &src)?;
        info!(src = %src, dst = %dst, "moved collection");
        Ok(())
    }

    /// Move a single node's record from `old` to `new`: remove the old
    /// key, invalidate the old binding, persist under the new key.
    /// Document store keys are id-based and survive untouched.
    fn relabel_node(
        &self,
        txn: Txn,
        old: &CollectionPath,
        new: &CollectionPath,
    ) -> Result<Arc<Collection>> {
        let col = self.resolve(old)?.ok_or_else(|| XylemError::Corrupt {
            key: old.as_str().to_string(),
            detail: "subtree member vanished during move".to_string(),
        })?;
        self.store.remove(txn, &key::collection_key(old))?;
        self.cache.invalidate(old);
        let mut relabeled = (*col).clone();
        relabeled.relabel(new.clone());
        self.persist(txn, relabeled)
    }

    // -----------------------------------------------------------------------
    // copy
    // -----------------------------------------------------------------------

    /// Copy the collection at `src_raw` under `dest_parent_raw` as
    /// `new_name`. The source is only read-locked; destinations get
    /// fresh ids. All permissions over both subtrees are checked before
    /// the first write, so a failed copy mutates nothing.
    pub fn copy_collection(
        &self,
        txn: Txn,
        subject: &Subject,
        src_raw: &str,
        dest_parent_raw: &str,
        new_name: &str,
        preserve: PreserveMode,
    ) -> Result<Arc<Collection>> {
        let src = Self::normalize(src_raw)?;
        let dest_parent = Self::normalize(dest_parent_raw)?;
        if !CollectionPath::is_single_segment(new_name) {
            return Err(XylemError::conflict(format!(
                "new collection name '{new_name}' must be a single path segment"
            )));
        }
        let dst = dest_parent.child(new_name);
        if src == dst {
            return Err(XylemError::conflict(format!("cannot copy '{src}' onto itself")));
        }
        if src == dest_parent || src.is_ancestor_of(&dest_parent) {
            return Err(XylemError::conflict(format!(
                "cannot copy '{src}' into its own subtree '{dest_parent}'"
            )));
        }

        // Read on the source subtree, write on the destination parent
        // (covers the new subtree), in the global path order.
        let _guards: Vec<_> = ordered_paths(&[&src, &dest_parent])
            .into_iter()
            .map(|p| {
                if p == src {
                    self.locks.acquire_read(p.as_str())
                } else {
                    self.locks.acquire_write(p.as_str())
                }
            })
            .collect();

        let source = self
            .resolve(&src)?
            .ok_or_else(|| XylemError::conflict(format!("no such collection '{src}'")))?;
        let target_parent = self
            .resolve(&dest_parent)?
            .ok_or_else(|| XylemError::conflict(format!("no such collection '{dest_parent}'")))?;
        if source.id == target_parent.id {
            return Err(XylemError::conflict(format!("cannot copy '{src}' into itself")));
        }

        Self::check(subject, &target_parent.permission, Access::WRITE, "write", &dest_parent, "copy into collection")?;
        Self::check(subject, &target_parent.permission, Access::EXECUTE, "execute", &dest_parent, "copy into collection")?;
        self.check_copy_permissions(subject, &src, &dst)?;

        self.triggers.before_copy(txn, &source, &dst)?;
        let copy_root = self.copy_tree(txn, subject, &src, &dst, preserve)?;
        self.triggers.after_copy(txn, &copy_root, &src)?;
        info!(src = %src, dst = %copy_root.path, "copied collection");
        Ok(copy_root)
    }

    /// Walk source and destination subtrees checking every permission
    /// and name constraint a copy will need, before anything is written.
    fn check_copy_permissions(
        &self,
        subject: &Subject,
        src: &CollectionPath,
        dst: &CollectionPath,
    ) -> Result<()> {
        let mut work = VecDeque::from([(src.clone(), dst.clone())]);
        while let Some((s, d)) = work.pop_front() {
            let col = self.resolve(&s)?.ok_or_else(|| XylemError::Corrupt {
                key: s.as_str().to_string(),
                detail: "source subtree member missing".to_string(),
            })?;
            Self::check(subject, &col.permission, Access::READ, "read", &s, "copy source")?;
            Self::check(subject, &col.permission, Access::EXECUTE, "execute", &s, "copy source")?;
            for doc in col.documents.values() {
                if !doc.permission.validate(subject, Access::READ) {
                    return Err(Self::denied(subject, "read", &s, &format!("copy document '{}'", doc.name)));
                }
            }
            if let Some(existing) = self.resolve(&d)? {
                Self::check(subject, &existing.permission, Access::WRITE, "write", &d, "replace copy destination")?;
                Self::check(subject, &existing.permission, Access::EXECUTE, "execute", &d, "replace copy destination")?;
                for doc in col.documents.values() {
                    if let Some(target_doc) = existing.documents.get(&doc.name) {
                        if !target_doc.permission.validate(subject, Access::WRITE) {
                            return Err(Self::denied(
                                subject,
                                "write",
                                &d,
                                &format!("replace document '{}'", target_doc.name),
                            ));
                        }
                    }
                }
            } else if let Some(parent) = self.resolve(&d.parent().unwrap_or_else(CollectionPath::root))? {
                // The node will be created; its parent must not already
                // own a document of the same name.
                let name = d.last_segment();
                if parent.has_document(name) {
                    return Err(XylemError::conflict(format!(
                        "collection '{}' already owns a document named '{name}'",
                        parent.path
                    )));
                }
            }
            for child in &col.children {
                work.push_back((s.child(child), d.child(child)));
            }
        }
        Ok(())
    }

    /// Create/refresh the destination subtree and copy every document.
    fn copy_tree(
        &self,
        txn: Txn,
        subject: &Subject,
        src: &CollectionPath,
        dst: &CollectionPath,
        preserve: PreserveMode,
    ) -> Result<Arc<Collection>> {
        let mut top = None;
        let mut work = VecDeque::from([(src.clone(), dst.clone())]);
        while let Some((s, d)) = work.pop_front() {
            let src_col = self.resolve(&s)?.ok_or_else(|| XylemError::Corrupt {
                key: s.as_str().to_string(),
                detail: "source subtree member vanished during copy".to_string(),
            })?;

            let mut dest_col = match self.resolve(&d)? {
                Some(existing) => (*existing).clone(),
                None => self.create_copy_target(txn, subject, &src_col, &d, preserve)?,
            };

            for doc in src_col.documents.values() {
                let target_doc_path = format!("{}/{}", d.as_str(), doc.name);
                self.triggers.before_copy_document(txn, doc, &target_doc_path)?;

                let replaced = dest_col.remove_document(&doc.name);
                if let Some(old) = &replaced {
                    // Dereference an overwritten binary before its
                    // metadata goes away, or the payload leaks.
                    if let ContentRef::Blob(blob) = old.content {
                        self.blobs.remove(txn, blob)?;
                    }
                    self.store
                        .remove(txn, &key::document_key(old.collection_id, old.resource_type, old.id))?;
                    self.store.free_document_id(txn, old.id)?;
                }

                let content = match doc.content {
                    ContentRef::Blob(blob) => ContentRef::Blob(self.blobs.retain(txn, blob)?),
                    ContentRef::Xml { node_root } => ContentRef::Xml { node_root },
                };
                let now = now_ms();
                let keep_source_attrs =
                    preserve == PreserveMode::Preserve && replaced.is_none();
                let new_doc = Document {
                    id: self.store.next_document_id(txn)?,
                    name: doc.name.clone(),
                    collection_id: dest_col.id,
                    resource_type: doc.resource_type,
                    permission: match &replaced {
                        Some(old) => old.permission.clone(),
                        None if keep_source_attrs => doc.permission.clone(),
                        None => Permission::document_default(subject),
                    },
                    created_ms: if keep_source_attrs { doc.created_ms } else { now },
                    modified_ms: now,
                    content,
                };
                self.persist_document(txn, &new_doc)?;
                self.triggers.after_copy_document(txn, &new_doc)?;
                dest_col.add_document(new_doc);
            }

            let dest_arc = self.persist(txn, dest_col)?;
            if top.is_none() {
                top = Some(dest_arc);
            }
            for child in &src_col.children {
                work.push_back((s.child(child), d.child(child)));
            }
        }
        top.ok_or_else(|| XylemError::conflict("copy of empty path set"))
    }

    /// Create one fresh destination node for a copy. The destination
    /// parent write lock held by [`copy_collection`] covers every node
    /// created here, so no further locks are taken; walking the full
    /// ancestor chain again under that lock would acquire an ancestor
    /// after a descendant. Caller permissions were settled by
    /// [`check_copy_permissions`] before the first write.
    ///
    /// [`copy_collection`]: NamespaceManager::copy_collection
    /// [`check_copy_permissions`]: NamespaceManager::check_copy_permissions
    fn create_copy_target(
        &self,
        txn: Txn,
        subject: &Subject,
        source: &Collection,
        path: &CollectionPath,
        preserve: PreserveMode,
    ) -> Result<Collection> {
        let parent_path = path.parent().unwrap_or_else(CollectionPath::root);
        let parent = self.resolve(&parent_path)?.ok_or_else(|| XylemError::Corrupt {
            key: parent_path.as_str().to_string(),
            detail: "copy destination parent is missing".to_string(),
        })?;

        let id = self.store.next_collection_id(txn)?;
        let mut permission = Permission::collection_default(subject);
        if parent.permission.is_setgid() {
            permission.group = parent.permission.group.clone();
            permission.mode |= xylem_types::permission::MODE_SETGID;
        }
        let mut fresh = Collection::new(id, path.clone(), permission);
        if preserve == PreserveMode::Preserve {
            // Fresh targets inherit the source attributes; a target that
            // already existed keeps its own ownership and never goes
            // through here.
            fresh.permission.preserve_from(&source.permission);
            fresh.created_ms = source.created_ms;
        }
        self.persist(txn, fresh.clone())?;

        let mut linked = (*parent).clone();
        linked.add_child(path.last_segment());
        self.persist(txn, linked)?;
        debug!(path = %path, id = %fresh.id, "created copy target");
        Ok(fresh)
    }

    // -----------------------------------------------------------------------
    // remove
    // -----------------------------------------------------------------------

    /// Remove the collection at `raw` and its whole subtree.
    ///
    /// Returns `Ok(false)`, with the namespace untouched, when a lock
    /// could not be obtained in time, so callers can retry; permission
    /// and trigger failures are errors. Validation of the entire subtree
    /// (permissions, before-delete hooks) runs before the first
    /// mutation, so a failed removal never leaves a partial state.
    ///
    /// Removing the root empties it but keeps the root record and id.
    pub fn remove_collection(&self, txn: Txn, subject: &Subject, raw: &str) -> Result<bool> {
        let path = Self::normalize(raw)?;
        let timeout = self.config.remove_lock_timeout;

        let parent_path = path.parent();
        let mut guards = Vec::new();
        if let Some(pp) = &parent_path {
            match self.locks.try_acquire_write(pp.as_str(), timeout) {
                Some(g) => guards.push(g),
                None => {
                    warn!(path = %pp, "remove: parent lock unavailable");
                    return Ok(false);
                }
            }
        }
        match self.locks.try_acquire_write(path.as_str(), timeout) {
            Some(g) => guards.push(g),
            None => {
                warn!(path = %path, "remove: collection lock unavailable");
                return Ok(false);
            }
        }

        let Some(target) = self.resolve(&path)? else {
            debug!(path = %path, "remove: no such collection");
            return Ok(false);
        };

        // Phase 1: validate the whole subtree top-down: permissions plus
        // every before-delete hook, collection and document alike.
        // Nothing is mutated yet, so any failure leaves the namespace
        // byte-for-byte unchanged.
        let mut order: Vec<Arc<Collection>> = Vec::new();
        let mut work = vec![Arc::clone(&target)];
        while let Some(col) = work.pop() {
            let parent_col = if col.path == path {
                match &parent_path {
                    Some(pp) => self.resolve(pp)?.ok_or_else(|| XylemError::Corrupt {
                        key: pp.as_str().to_string(),
                        detail: "parent of existing collection is missing".to_string(),
                    })?,
                    // The root acts as its own parent for the gate.
                    None => Arc::clone(&col),
                }
            } else {
                // Inner node: its parent is inside the subtree and was
                // resolved when we walked past it.
                let pp = col.path.parent().unwrap_or_else(CollectionPath::root);
                self.resolve(&pp)?.unwrap_or_else(|| Arc::clone(&col))
            };
            Self::check(subject, &parent_col.permission, Access::WRITE, "write", &col.path, "remove collection")?;
            Self::check(subject, &parent_col.permission, Access::EXECUTE, "execute", &col.path, "remove collection")?;
            Self::check(subject, &col.permission, Access::READ, "read", &col.path, "remove collection")?;
            if !col.is_empty() {
                Self::check(subject, &col.permission, Access::WRITE, "write", &col.path, "remove non-empty collection")?;
                Self::check(subject, &col.permission, Access::EXECUTE, "execute", &col.path, "remove non-empty collection")?;
            }
            self.triggers.before_delete(txn, &col)?;
            for doc in col.documents.values() {
                self.triggers.before_delete_document(txn, doc)?;
            }
            order.push(Arc::clone(&col));
            for child in &col.children {
                match self.resolve(&col.path.child(child))? {
                    Some(c) => work.push(c),
                    // A dangling child entry must not wedge the removal
                    // of everything else.
                    None => warn!(parent = %col.path, child, "dangling child entry during remove"),
                }
            }
        }

        // Phase 2: mutate bottom-up (children strictly before parents).
        for col in order.iter().rev() {
            self.index.remove_collection(txn, col)?;

            for doc in col.documents.values() {
                if let ContentRef::Blob(blob) = doc.content {
                    self.blobs.remove(txn, blob)?;
                }
                self.triggers.after_delete_document(txn, &doc.path_under(&col.path))?;
                self.store.free_document_id(txn, doc.id)?;
            }
            self.store.range_remove(txn, &key::document_prefix(col.id))?;

            if col.path.is_root() {
                let mut cleared = (**col).clone();
                cleared.children.clear();
                cleared.documents.clear();
                self.persist(txn, cleared)?;
            } else {
                if col.path == path {
                    if let Some(pp) = &parent_path {
                        if let Some(parent_col) = self.resolve(pp)? {
                            let mut unlinked = (*parent_col).clone();
                            unlinked.remove_child(col.path.last_segment());
                            self.persist(txn, unlinked)?;
                        }
                    }
                }
                self.store.remove(txn, &key::collection_key(&col.path))?;
                self.cache.invalidate(&col.path);
                self.store.free_collection_id(txn, col.id)?;
            }

            self.triggers.after_delete(txn, &col.path)?;
        }

        info!(path = %path, nodes = order.len(), "removed collection");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xylem_store::{MemoryBlobStore, MemoryStore};
    use xylem_types::CollectionId;

    fn setup() -> (NamespaceManager, Arc<MemoryStore>, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let manager = NamespaceManager::new(
            Arc::clone(&store) as Arc<dyn DurableStore>,
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
        );
        (manager, store, blobs)
    }

    fn user(name: &str, groups: &[&str]) -> Subject {
        Subject::new(name, groups.iter().map(|s| s.to_string()).collect(), false)
    }

    #[test]
    fn creates_missing_ancestors_in_one_call() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();

        let (created, c) = mgr
            .get_or_create_collection_explicit(txn, &system, "/db/a/b/c")
            .unwrap();
        assert!(created);
        assert_eq!(c.path.as_str(), "/db/a/b/c");

        let a = mgr.open_collection(&system, "/db/a", LockMode::None).unwrap().unwrap();
        assert!(a.has_child("b"));
        let b = mgr.open_collection(&system, "/db/a/b", LockMode::None).unwrap().unwrap();
        assert!(b.has_child("c"));

        // Every node got a persistent record.
        for p in ["/db", "/db/a", "/db/a/b", "/db/a/b/c"] {
            let keyb = key::collection_key(&CollectionPath::normalize(p).unwrap());
            assert!(store.get(&keyb).unwrap().is_some(), "{p}");
        }

        let (created_again, again) = mgr
            .get_or_create_collection_explicit(txn, &system, "/db/a/b/c")
            .unwrap();
        assert!(!created_again);
        assert_eq!(again.id, c.id);
    }

    #[test]
    fn root_takes_the_reserved_id() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let root = mgr
            .get_or_create_collection(txn, &Subject::system(), "/db")
            .unwrap();
        assert_eq!(root.id, CollectionId::ROOT);
    }

    #[test]
    fn create_requires_write_and_execute_on_parent() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();
        mgr.get_or_create_collection(txn, &system, "/db").unwrap();

        // Root defaults to 0755: no write bit for others.
        let err = mgr
            .get_or_create_collection(txn, &user("bob", &[]), "/db/bob")
            .unwrap_err();
        assert!(matches!(err, XylemError::PermissionDenied { .. }), "{err}");
        assert!(mgr.open_collection(&system, "/db/bob", LockMode::None).unwrap().is_none());
    }

    #[test]
    fn setgid_parent_passes_its_group_down() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();

        let proj = mgr.get_or_create_collection(txn, &system, "/db/proj").unwrap();
        let mut chmodded = (*proj).clone();
        chmodded.permission.group = "team".to_string();
        chmodded.permission.mode |= xylem_types::permission::MODE_SETGID;
        {
            let _w = mgr.locks().acquire_write("/db/proj");
            mgr.save_collection(txn, &chmodded).unwrap();
        }

        let child = mgr.get_or_create_collection(txn, &system, "/db/proj/sub").unwrap();
        assert_eq!(child.permission.group, "team");
        assert!(child.permission.is_setgid());
    }

    #[test]
    fn document_name_blocks_child_collection() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();

        let root = mgr.get_or_create_collection(txn, &system, "/db").unwrap();
        let mut with_doc = (*root).clone();
        with_doc.add_document(Document {
            id: store.next_document_id(txn).unwrap(),
            name: "report".to_string(),
            collection_id: root.id,
            resource_type: ResourceType::Xml,
            permission: Permission::document_default(&system),
            created_ms: now_ms(),
            modified_ms: now_ms(),
            content: ContentRef::Xml { node_root: 0 },
        });
        {
            let _w = mgr.locks().acquire_write("/db");
            mgr.save_collection(txn, &with_doc).unwrap();
        }

        let err = mgr.get_or_create_collection(txn, &system, "/db/report").unwrap_err();
        assert!(matches!(err, XylemError::Conflict { .. }), "{err}");
    }

    #[test]
    fn save_survives_cache_invalidation() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();

        let col = mgr.get_or_create_collection(txn, &system, "/db/notes").unwrap();
        let mut edited = (*col).clone();
        edited.permission.mode = 0o700;
        {
            let _w = mgr.locks().acquire_write("/db/notes");
            mgr.save_collection(txn, &edited).unwrap();
        }

        let path = CollectionPath::normalize("/db/notes").unwrap();
        mgr.cache().invalidate(&path);
        let reloaded = mgr.open_collection(&system, "/db/notes", LockMode::None).unwrap().unwrap();
        assert_eq!(reloaded.permission.mode, 0o700);
        assert_eq!(reloaded.id, col.id);
        assert_eq!(reloaded.created_ms, col.created_ms);
    }

    #[test]
    fn pattern_search_scans_the_store() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();
        for p in ["/db/logs/2024", "/db/logs/2025", "/db/data"] {
            mgr.get_or_create_collection(txn, &system, p).unwrap();
        }

        let mut hits = mgr.find_collections_matching(r"^/db/logs/\d{4}$").unwrap();
        hits.sort();
        assert_eq!(hits, vec!["/db/logs/2024", "/db/logs/2025"]);

        assert!(matches!(
            mgr.find_collections_matching("(unclosed").unwrap_err(),
            XylemError::Conflict { .. }
        ));
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();
        mgr.get_or_create_collection(txn, &system, "/db/a/b").unwrap();

        let err = mgr.move_collection(txn, &system, "/db/a", "/db/a/b", "loop").unwrap_err();
        assert!(matches!(err, XylemError::Conflict { .. }), "{err}");
        let err = mgr.move_collection(txn, &system, "/db/a", "/db/a", "loop").unwrap_err();
        assert!(matches!(err, XylemError::Conflict { .. }), "{err}");
        let err = mgr.move_collection(txn, &system, "/db", "/db/a", "root").unwrap_err();
        assert!(matches!(err, XylemError::Conflict { .. }), "{err}");
    }

    #[test]
    fn remove_is_a_soft_no_for_missing_paths() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();
        mgr.get_or_create_collection(txn, &system, "/db").unwrap();
        assert!(!mgr.remove_collection(txn, &system, "/db/ghost").unwrap());
    }

    #[test]
    fn removing_the_root_only_empties_it() {
        let (mgr, store, _) = setup();
        let txn = store.begin();
        let system = Subject::system();
        mgr.get_or_create_collection(txn, &system, "/db/a/b").unwrap();

        assert!(mgr.remove_collection(txn, &system, "/db").unwrap());
        let root = mgr.open_collection(&system, "/db", LockMode::None).unwrap().unwrap();
        assert_eq!(root.id, CollectionId::ROOT);
        assert!(root.is_empty());
        assert!(mgr.open_collection(&system, "/db/a", LockMode::None).unwrap().is_none());
    }

    #[test]
    fn seed_config_lands_in_a_fresh_root() {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mgr = NamespaceManager::new(
            Arc::clone(&store) as Arc<dyn DurableStore>,
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
        )
        .with_config(NamespaceConfig {
            seed_config: Some("<collection/>".to_string()),
            ..NamespaceConfig::default()
        });

        let txn = store.begin();
        let root = mgr.get_or_create_collection(txn, &Subject::system(), "/db").unwrap();
        let doc = root.documents.get("collection.xconf").expect("seed document");
        let ContentRef::Blob(blob) = doc.content else {
            panic!("seed content should be blob-backed");
        };
        assert_eq!(blobs.get(blob).unwrap().unwrap(), b"<collection/>");
    }
}
