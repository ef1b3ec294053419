//! Error taxonomy for Xylem namespace operations.
//!
//! The split mirrors how callers react, not where the failure happened:
//!
//! - benign "not there" on read paths is an `Option`, never an error;
//! - [`XylemError::LockFailure`] is retryable and `remove_collection`
//!   converts it into a soft `Ok(false)`;
//! - everything else aborts the caller's transaction and propagates.

use xylem_types::CollectionPath;

use thiserror::Error;

/// Primary error type for namespace operations.
#[derive(Error, Debug)]
pub enum XylemError {
    /// The principal lacks a required access bit. Never retried.
    #[error("permission denied: {subject} requires {access} on '{path}': {detail}")]
    PermissionDenied {
        subject: String,
        access: &'static str,
        path: CollectionPath,
        detail: String,
    },

    /// A required lock could not be obtained in time. Retryable.
    #[error("failed to acquire {mode} lock on '{path}'")]
    LockFailure { mode: &'static str, path: String },

    /// A structural precondition does not hold (self-move, cyclic move,
    /// name collisions, bad segment names).
    #[error("conflict: {detail}")]
    Conflict { detail: String },

    /// Underlying persistence failure. Fatal to the current transaction.
    #[error("store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),

    /// A record in the store could not be decoded.
    #[error("corrupt record for '{key}': {detail}")]
    Corrupt { key: String, detail: String },

    /// A before-hook vetoed the operation; fully unwound.
    #[error("trigger aborted {event} on '{path}': {reason}")]
    TriggerAborted {
        event: &'static str,
        path: CollectionPath,
        reason: String,
    },

    /// The persistent id counters are exhausted.
    #[error("identifier space exhausted for {kind}")]
    IdExhausted { kind: &'static str },
}

impl XylemError {
    /// Shorthand for a [`XylemError::Conflict`].
    #[must_use]
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: detail.into(),
        }
    }

    /// True when the failure is a lock acquisition that the caller may
    /// simply retry (the soft-failure class of `remove_collection`).
    #[must_use]
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, Self::LockFailure { .. })
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, XylemError>;
