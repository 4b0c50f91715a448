//! Client error types.

use std::fmt;

use notirouter_protocol::ProtocolError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// IO error.
    Io(std::io::Error),
    /// Connection to the router failed.
    Connection(String),
    /// Encoding or decoding error, or an unexpected reply.
    Protocol(String),
    /// Operation timed out.
    Timeout(String),
    /// Registration refused (router full).
    Rejected(String),
    /// The router answered with its error byte.
    Server(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Rejected(msg) => write!(f, "rejected: {}", msg),
            Self::Server(msg) => write!(f, "router error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(err) => Self::Io(err),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<notirouter_core::LoggingError> for ClientError {
    fn from(err: notirouter_core::LoggingError) -> Self {
        Self::Config(format!("failed to initialize logging: {}", err))
    }
}
