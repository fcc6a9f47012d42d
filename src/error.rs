//! Error types for the itervault library
//!
//! This module defines all error types that can occur during snapshot,
//! rollback and cleanup operations. Errors are designed to be informative
//! and actionable, carrying the snapshot id or path needed to decide
//! between retry and abort.
//!
//! Two negative outcomes are deliberately *not* errors: a version conflict
//! detected by the tracker and "nothing to undo" are ordinary result values
//! on the success path, because both are designed detection outcomes rather
//! than failures.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the itervault library
pub type Result<T> = std::result::Result<T, VaultError>;

/// Main error type for all itervault operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A snapshot directory with this id already exists
    #[error("Snapshot already exists: {0}")]
    SnapshotAlreadyExists(String),

    /// Snapshot not found in the store
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Pre-flight disk check found too little free space for a full copy
    #[error("Insufficient disk space: need {required} bytes, {available} bytes available")]
    InsufficientDiskSpace {
        /// Bytes the copy is estimated to need
        required: u64,
        /// Bytes actually free at the destination
        available: u64,
    },

    /// Restore operation failed
    #[error("Restore of snapshot '{snapshot_id}' failed: {message}")]
    RestoreFailed {
        /// Snapshot that was being restored
        snapshot_id: String,
        /// What went wrong, including any fallback attempts
        message: String,
    },

    /// Reference collection failed; orphan cleanup was skipped entirely
    #[error("Orphan scan aborted: {0}")]
    OrphanScanAborted(String),

    /// A delete target fell outside the whitelisted cleanable directories
    #[error("Path out of cleanable scope: {0:?}")]
    PathOutOfScope(PathBuf),

    /// Invalid snapshot id (empty after sanitization)
    #[error("Invalid snapshot id: {0:?}")]
    InvalidSnapshotId(String),

    /// Project root does not exist or is not a directory
    #[error("Project root not usable: {0:?}")]
    ProjectRootNotFound(PathBuf),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        VaultError::Internal(msg.into())
    }

    /// Create a restore failure with context
    pub fn restore_failed(snapshot_id: impl Into<String>, message: impl Into<String>) -> Self {
        VaultError::RestoreFailed {
            snapshot_id: snapshot_id.into(),
            message: message.into(),
        }
    }

    /// Check if this error is recoverable by retrying the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VaultError::InsufficientDiskSpace { .. } | VaultError::OrphanScanAborted(_)
        )
    }

    /// Check if this error leaves the project in a state that needs the
    /// recovery log to diagnose
    pub fn needs_recovery_log(&self) -> bool {
        matches!(self, VaultError::RestoreFailed { .. })
    }
}
