//! Bridge error types.

use std::io;
use std::time::Duration;

/// Errors from framing, correlation and the HTTP façade.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A frame declared or carried more bytes than allowed.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Declared or actual size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The stream ended inside a frame.
    #[error("stream ended inside a frame")]
    TruncatedFrame,

    /// Transport I/O failure.
    #[error("bridge I/O error: {0}")]
    Io(#[from] io::Error),

    /// Payload is not a valid message.
    #[error("invalid bridge message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// No response arrived in time.
    #[error("command {command} timed out after {limit:?}")]
    Timeout {
        /// Command name.
        command: String,
        /// Limit that elapsed.
        limit: Duration,
    },

    /// The peer went away.
    #[error("bridge connection closed")]
    ConnectionClosed,

    /// The peer answered with a failure.
    #[error("{0}")]
    Command(String),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
