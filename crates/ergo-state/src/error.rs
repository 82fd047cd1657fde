//! Error types for snapshot state.

use thiserror::Error;

/// Snapshot state errors.
#[derive(Error, Debug)]
pub enum StateError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] ergo_storage::StorageError),

    /// Stored bytes failed to decode.
    #[error("Network encoding error: {0}")]
    Network(#[from] ergo_network::NetworkError),

    /// Manifest not found.
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    /// Snapshot not found.
    #[error("Snapshot not found: height {0}")]
    SnapshotNotFound(i32),

    /// Stored data is inconsistent.
    #[error("Corrupted snapshot data: {0}")]
    Corruption(String),
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
