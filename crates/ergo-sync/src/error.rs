//! Sync error types.

use thiserror::Error;

/// Sync errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] ergo_network::NetworkError),

    /// State error.
    #[error("State error: {0}")]
    State(#[from] ergo_state::StateError),

    /// The command receiver was dropped.
    #[error("Command channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Whether the synchronizer cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
