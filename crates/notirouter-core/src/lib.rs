//! Shared logging setup for notirouter binaries.

pub mod logging;

pub use self::logging::{LoggingConfig, LoggingError, LoggingFormat, init_logging};
