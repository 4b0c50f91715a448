//! Logging setup for notirouter.
//!
//! Every binary installs one global `tracing` subscriber. The `RUST_LOG`
//! environment variable overrides the configured level.
//!
//! ```ignore
//! use notirouter_core::{init_logging, LoggingConfig, LoggingFormat};
//!
//! // Router daemon, structured output
//! init_logging(LoggingConfig::daemon().with_format(LoggingFormat::Json))?;
//!
//! // One-shot client command
//! init_logging(LoggingConfig::cli(false))?;
//! ```

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Target prefix shared by every notirouter crate.
const TARGET_PREFIX: &str = "notirouter";

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber is already installed.
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// Bad filter directive.
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),

    /// Unknown output format name.
    #[error("unknown log format: {0} (expected pretty, compact or json)")]
    UnknownFormat(String),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl FromStr for LoggingFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level used when RUST_LOG is not set.
    pub default_level: Level,
    /// Output format.
    pub format: LoggingFormat,
    /// Include file/line information.
    pub include_location: bool,
    /// Include the module path.
    pub include_target: bool,
    /// Include timestamps.
    pub include_timestamp: bool,
    /// Log span open/close events.
    pub include_span_events: bool,
    /// Explicit filter directive, takes precedence over everything else.
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            format: LoggingFormat::Compact,
            include_location: false,
            include_target: true,
            include_timestamp: true,
            include_span_events: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Preset for short-lived client commands: warnings only, no timestamps.
    #[must_use]
    pub fn cli(debug: bool) -> Self {
        Self {
            default_level: if debug { Level::DEBUG } else { Level::WARN },
            format: LoggingFormat::Compact,
            include_location: debug,
            include_target: false,
            include_timestamp: false,
            include_span_events: false,
            env_filter: None,
        }
    }

    /// Preset for the long-running router.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            default_level: Level::INFO,
            format: LoggingFormat::Compact,
            include_location: false,
            include_target: true,
            include_timestamp: true,
            include_span_events: false,
            env_filter: None,
        }
    }

    /// Set the default log level
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set the output format
    #[must_use]
    pub fn with_format(mut self, format: LoggingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set a custom env filter directive
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Builds the filter: explicit directive, then `RUST_LOG`, then the
    /// default level scoped to notirouter crates.
    pub fn build_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Some(ref filter) = self.env_filter {
            return Ok(EnvFilter::try_new(filter)?);
        }
        Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", TARGET_PREFIX, self.default_level))
        }))
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set or if the filter
/// directive is invalid.
pub fn init_logging(config: LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = config.build_filter()?;

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LoggingFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target)
                    .with_span_events(span_events),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LoggingFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target)
                .with_span_events(span_events);

            let layer = if config.include_timestamp {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            };

            let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LoggingFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target)
                    .with_span_events(span_events),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_preset_levels() {
        assert_eq!(LoggingConfig::cli(false).default_level, Level::WARN);
        let debug = LoggingConfig::cli(true);
        assert_eq!(debug.default_level, Level::DEBUG);
        assert!(debug.include_location);
        assert!(!debug.include_timestamp);
    }

    #[test]
    fn daemon_preset() {
        let config = LoggingConfig::daemon();
        assert_eq!(config.default_level, Level::INFO);
        assert_eq!(config.format, LoggingFormat::Compact);
        assert!(config.include_timestamp);
    }

    #[test]
    fn format_from_str() {
        assert_eq!("json".parse::<LoggingFormat>().unwrap(), LoggingFormat::Json);
        assert_eq!("Pretty".parse::<LoggingFormat>().unwrap(), LoggingFormat::Pretty);
        assert!(matches!(
            "xml".parse::<LoggingFormat>(),
            Err(LoggingError::UnknownFormat(_))
        ));
    }

    #[test]
    fn explicit_filter_wins() {
        let config = LoggingConfig::daemon().with_env_filter("notirouter_server=trace");
        assert!(config.build_filter().is_ok());

        let bad = LoggingConfig::daemon().with_env_filter("notirouter=notalevel");
        assert!(matches!(bad.build_filter(), Err(LoggingError::EnvFilter(_))));
    }
}
