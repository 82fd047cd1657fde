//! Network error types.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Payload violates the static contract of its codec.
    #[error("Malformed {message} message: {reason}")]
    MalformedMessage {
        message: &'static str,
        reason: String,
    },

    /// Payload larger than the codec ceiling.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Item count above the configured limit.
    #[error("Too many items in {message}: {count}, max {max}")]
    TooManyItems {
        message: &'static str,
        count: u64,
        max: usize,
    },

    /// No codec bound to the message code.
    #[error("Unknown message code: {0}")]
    UnknownCode(u8),

    /// Two codecs registered for the same code.
    #[error("Duplicate message code: {0}")]
    DuplicateCode(u8),

    /// A message variant was handed to a codec that does not own it.
    #[error("Codec {codec} cannot encode {got}")]
    CodecMismatch {
        codec: &'static str,
        got: &'static str,
    },

    /// Registry is missing codecs for some message codes.
    #[error("No codec registered for codes {0:?}")]
    IncompleteRegistry(Vec<u8>),

    /// Invalid identifier.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Network magic mismatch.
    #[error("Network magic mismatch: expected {expected:02x?}, got {got:02x?}")]
    MagicMismatch { expected: [u8; 4], got: [u8; 4] },

    /// Frame checksum mismatch.
    #[error("Checksum mismatch for message code {0}")]
    ChecksumMismatch(u8),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Create a malformed-message error.
    pub fn malformed(message: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message,
            reason: reason.into(),
        }
    }

    /// Whether the error comes from a payload failing codec bounds checks.
    ///
    /// Unknown codes are excluded: they usually mean version skew.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage { .. } | Self::MessageTooLarge { .. } | Self::TooManyItems { .. }
        )
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
