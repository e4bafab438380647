//! Error types for sync operations.

use std::io;
use thiserror::Error;

/// Errors that can occur during a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during local file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// Failure reported by the object store.
    #[error(transparent)]
    StoreError(#[from] StoreError),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// Invalid or incomplete configuration.
    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    /// Downloaded bytes do not match the entity tag advertised by the store.
    #[error("MD5 mismatch for {key}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },
}

impl SyncError {
    /// Whether this error only fails the current work item.
    ///
    /// Store and integrity failures are isolated to the item; anything else
    /// (local I/O in particular) aborts the run.
    pub fn is_item_local(&self) -> bool {
        match self {
            SyncError::StoreError(StoreError::LocalRead(_)) => false,
            SyncError::StoreError(_) | SyncError::IntegrityMismatch { .. } => true,
            _ => false,
        }
    }
}

/// Errors raised by an object store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Network, credential or service-side failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A multipart session was used out of protocol order.
    #[error("Multipart session {session_id} for {key}: {reason}")]
    Multipart {
        key: String,
        session_id: String,
        reason: String,
    },

    /// Local read performed on behalf of the store failed.
    #[error("Local read failed: {0}")]
    LocalRead(#[from] io::Error),
}

impl From<opendal::Error> for StoreError {
    fn from(err: opendal::Error) -> Self {
        if err.kind() == opendal::ErrorKind::NotFound {
            StoreError::NotFound(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

/// Configuration problems detected before any I/O happens.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Both --bucket [BUCKET] and --prefix [PREFIX] are required.")]
    MissingBucketAndPrefix,

    #[error("--bucket [BUCKET] is required.")]
    MissingBucket,

    #[error("--prefix [PREFIX] is required.")]
    MissingPrefix,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}
