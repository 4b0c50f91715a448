//! Server error types.

use std::io;

use notirouter_protocol::{Address, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Result type for a single connection session.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while starting or running the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (bind, accept, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (encoding, decoding).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Listen address cannot be used.
    #[error("Invalid listen address: {addr}")]
    InvalidListenAddress { addr: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid listen address error.
    pub fn invalid_listen_address(addr: impl Into<String>) -> Self {
        Self::InvalidListenAddress { addr: addr.into() }
    }
}

/// Errors contained within one connection session.
///
/// None of these ever reach the accept loop; they are logged when the
/// session ends.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed input or a broken read.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Notification addressed to a slot with no live connection.
    #[error("no live connection registered at address {address}")]
    UnknownReceptor { address: Address },

    /// A reply or forward could not be written.
    #[error("write to {target} failed: {source}")]
    TransportWriteFailure {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Client stayed silent for too long.
    #[error("timeout during {operation}")]
    Timeout { operation: &'static str },
}

impl SessionError {
    /// Creates a transport write failure.
    pub fn write_failure(target: impl Into<String>, source: io::Error) -> Self {
        Self::TransportWriteFailure {
            target: target.into(),
            source,
        }
    }
}
