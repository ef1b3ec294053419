//! Secondary-index collaborator.
//!
//! The value and structural indexes live outside this crate; the
//! namespace manager only has to tell them when a collection's entries
//! must be dropped during removal.

use xylem_error::Result;
use xylem_store::Txn;

use crate::collection::Collection;

/// Seam to the external index subsystem.
pub trait IndexController: Send + Sync {
    /// Drop every index entry belonging to `collection`.
    fn remove_collection(&self, txn: Txn, collection: &Collection) -> Result<()>;
}

/// Default controller for deployments without secondary indexes.
#[derive(Default)]
pub struct NoopIndexController;

impl IndexController for NoopIndexController {
    fn remove_collection(&self, _txn: Txn, _collection: &Collection) -> Result<()> {
        Ok(())
    }
}
