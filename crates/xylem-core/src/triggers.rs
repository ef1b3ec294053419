//! Lifecycle trigger hooks.
//!
//! Triggers observe and may veto structural operations: a failing
//! `before_*` hook aborts the operation before any mutation, and the
//! manager surfaces it as [`XylemError::TriggerAborted`] (or whatever
//! error the hook returns). `after_*` failures propagate too; by then the
//! transaction owner decides whether to abort.
//!
//! Move and copy fire collection hooks once, around the top-level node.
//! Remove fires them per collection torn down; every `before_delete` in
//! the subtree runs before the first mutation. Document hooks fire per
//! document.

use std::sync::Arc;

use xylem_error::Result;
use xylem_store::Txn;
use xylem_types::CollectionPath;

use crate::collection::{Collection, Document};

/// Hooks around collection lifecycle events. All default to no-ops.
#[allow(unused_variables)]
pub trait CollectionTrigger: Send + Sync {
    fn before_create(&self, txn: Txn, path: &CollectionPath) -> Result<()> {
        Ok(())
    }
    fn after_create(&self, txn: Txn, collection: &Collection) -> Result<()> {
        Ok(())
    }
    fn before_move(&self, txn: Txn, source: &Collection, target: &CollectionPath) -> Result<()> {
        Ok(())
    }
    fn after_move(&self, txn: Txn, moved: &Collection, old_path: &CollectionPath) -> Result<()> {
        Ok(())
    }
    fn before_copy(&self, txn: Txn, source: &Collection, target: &CollectionPath) -> Result<()> {
        Ok(())
    }
    fn after_copy(&self, txn: Txn, copy: &Collection, source_path: &CollectionPath) -> Result<()> {
        Ok(())
    }
    fn before_delete(&self, txn: Txn, collection: &Collection) -> Result<()> {
        Ok(())
    }
    fn after_delete(&self, txn: Txn, old_path: &CollectionPath) -> Result<()> {
        Ok(())
    }
}

/// Hooks around document lifecycle events. All default to no-ops.
#[allow(unused_variables)]
pub trait DocumentTrigger: Send + Sync {
    fn before_delete_document(&self, txn: Txn, doc: &Document) -> Result<()> {
        Ok(())
    }
    fn after_delete_document(&self, txn: Txn, doc_path: &str) -> Result<()> {
        Ok(())
    }
    fn before_copy_document(&self, txn: Txn, doc: &Document, target_path: &str) -> Result<()> {
        Ok(())
    }
    fn after_copy_document(&self, txn: Txn, copy: &Document) -> Result<()> {
        Ok(())
    }
}

/// Ordered set of registered triggers, invoked front to back. The first
/// error stops the chain and propagates.
#[derive(Default, Clone)]
pub struct TriggerChain {
    collection: Vec<Arc<dyn CollectionTrigger>>,
    document: Vec<Arc<dyn DocumentTrigger>>,
}

impl TriggerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_collection(&mut self, trigger: Arc<dyn CollectionTrigger>) {
        self.collection.push(trigger);
    }

    pub fn register_document(&mut self, trigger: Arc<dyn DocumentTrigger>) {
        self.document.push(trigger);
    }

    pub fn before_create(&self, txn: Txn, path: &CollectionPath) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.before_create(txn, path))
    }

    pub fn after_create(&self, txn: Txn, collection: &Collection) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.after_create(txn, collection))
    }

    pub fn before_move(&self, txn: Txn, source: &Collection, target: &CollectionPath) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.before_move(txn, source, target))
    }

    pub fn after_move(&self, txn: Txn, moved: &Collection, old_path: &CollectionPath) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.after_move(txn, moved, old_path))
    }

    pub fn before_copy(&self, txn: Txn, source: &Collection, target: &CollectionPath) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.before_copy(txn, source, target))
    }

    pub fn after_copy(&self, txn: Txn, copy: &Collection, source_path: &CollectionPath) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.after_copy(txn, copy, source_path))
    }

    pub fn before_delete(&self, txn: Txn, collection: &Collection) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.before_delete(txn, collection))
    }

    pub fn after_delete(&self, txn: Txn, old_path: &CollectionPath) -> Result<()> {
        self.collection.iter().try_for_each(|t| t.after_delete(txn, old_path))
    }

    pub fn before_delete_document(&self, txn: Txn, doc: &Document) -> Result<()> {
        self.document.iter().try_for_each(|t| t.before_delete_document(txn, doc))
    }

    pub fn after_delete_document(&self, txn: Txn, doc_path: &str) -> Result<()> {
        self.document.iter().try_for_each(|t| t.after_delete_document(txn, doc_path))
    }

    pub fn before_copy_document(&self, txn: Txn, doc: &Document, target_path: &str) -> Result<()> {
        self.document
            .iter()
            .try_for_each(|t| t.before_copy_document(txn, doc, target_path))
    }

    pub fn after_copy_document(&self, txn: Txn, copy: &Document) -> Result<()> {
        self.document.iter().try_for_each(|t| t.after_copy_document(txn, copy))
    }
}
