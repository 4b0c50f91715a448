//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Empty buffer, nothing to decode.
    #[error("empty message")]
    EmptyMessage,

    /// Buffer ended before the message was complete.
    #[error("truncated {kind} message: expected at least {expected} bytes, got {received}")]
    TruncatedMessage {
        kind: &'static str,
        expected: usize,
        received: usize,
    },

    /// Field does not fit its length prefix.
    #[error("{field} too long: {len} bytes (max: {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// String field is not valid UTF-8.
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// Register outcome byte outside the known range.
    #[error("invalid register outcome code: {0}")]
    InvalidOutcome(u8),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true if more bytes could complete the message.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TruncatedMessage { .. })
    }
}
