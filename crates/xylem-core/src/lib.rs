//! Collection namespace core.
//!
//! This crate implements the hierarchical namespace of collections and
//! documents on top of the `xylem-store` contracts:
//!
//! - [`lock::PathLockManager`]: named re-entrant read/write locks keyed
//!   by collection and document path. A write lock on a collection path
//!   covers its entire subtree by convention.
//! - [`cache::CollectionCache`]: the in-memory path-to-collection map,
//!   the authority for "is this path currently resident".
//! - [`triggers`]: before/after lifecycle hooks that may veto a mutation.
//! - [`manager::NamespaceManager`]: the orchestrator for get-or-create,
//!   open, move, copy, remove, save and pattern search over the
//!   namespace.
//!
//! Deadlock avoidance rests on one global rule, enforced by
//! [`lock::ordered_paths`]: locks are always acquired ancestor before
//! descendant, and multi-node operations take their whole lock set in one
//! deterministic lexicographic pass before mutating anything.

pub mod cache;
pub mod collection;
pub mod config;
pub mod handle;
pub mod index;
pub mod lock;
pub mod manager;
pub mod triggers;

pub use cache::CollectionCache;
pub use collection::{Collection, Document};
pub use config::NamespaceConfig;
pub use handle::CollectionHandle;
pub use lock::PathLockManager;
pub use manager::NamespaceManager;
