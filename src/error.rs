//! Error types for the storage layer.
//!
//! Failures are layered: [`EngineError`](crate::engine::EngineError) describes
//! faults reported by the embedded storage engine, while [`StorageError`] is
//! the surface the rest of the system sees. Engine faults are wrapped rather
//! than flattened so callers can still reach the originating cause through
//! `source()`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::engine::EngineError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Failures surfaced by [`QueueStorage`](crate::QueueStorage) and the scoped
/// action layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Initialization failed: directory preparation, attach, schema
    /// creation, the version-gate read or the catalog load. Any recovery
    /// attempt has already run by the time this is raised.
    #[error("could not initialize queue storage at {}: {source}", .path.display())]
    Initialization {
        path: PathBuf,
        #[source]
        source: Box<StorageError>,
    },

    /// The database was produced by an incompatible schema revision.
    #[error(
        "storage at {} was created by schema version {found}, this build \
         requires {expected}; migrate the database or move it aside and let \
         a fresh one be created",
        .path.display()
    )]
    SchemaVersionMismatch {
        found: String,
        expected: String,
        path: PathBuf,
    },

    /// The persisted schema is structurally damaged, for example a missing
    /// metadata row or column layout.
    #[error("storage metadata is corrupted: {0}")]
    Corrupted(String),

    /// The storage instance has already been shut down.
    #[error("queue storage has been disposed")]
    Disposed,

    /// Graceful shutdown could not flush and detach the database.
    #[error("failed to dispose queue storage: {0}")]
    Disposal(#[source] EngineError),

    /// An engine operation failed inside a scoped action.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A row could not be encoded or decoded.
    #[error("record codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// A record field named a column the table layout does not declare.
    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("queue '{0}' already exists")]
    QueueAlreadyExists(String),

    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),

    /// Filesystem preparation, such as directory creation, failed.
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Wraps a startup failure with the database path it concerns.
    ///
    /// Version mismatches keep their own identity; everything else becomes
    /// [`StorageError::Initialization`].
    pub(crate) fn during_init(path: &Path, source: StorageError) -> StorageError {
        match source {
            mismatch @ StorageError::SchemaVersionMismatch { .. } => mismatch,
            source => StorageError::Initialization {
                path: path.to_path_buf(),
                source: Box::new(source),
            },
        }
    }
}
