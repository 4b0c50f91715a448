//! Command-line interface definition.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::RouterConfig;

/// notirouter - route short notifications between named clients
#[derive(Debug, Parser)]
#[command(name = "notirouter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "NOTIROUTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Router address for client commands (host:port)
    #[arg(long, short, env = "NOTIROUTER_SERVER", global = true)]
    pub server: Option<String>,

    /// Connect and reply timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Router address: flag, then config file.
    pub fn server_addr(&self, config: &RouterConfig) -> String {
        self.server
            .clone()
            .unwrap_or_else(|| config.client.server.clone())
    }

    /// Client timeout: flag, then config file.
    pub fn timeout(&self, config: &RouterConfig) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(config.client.timeout))
    }

    /// Whether debug output was requested on the command line or in the file.
    pub fn debug_enabled(&self, config: &RouterConfig) -> bool {
        self.debug || config.debug
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the router in the foreground
    Serve {
        /// Listen address (`:30106`, `0.0.0.0:30106` or a bare port)
        #[arg(long, short)]
        port: Option<String>,

        /// Name of the server entry at address 0
        #[arg(long, short)]
        name: Option<String>,

        /// Log format: pretty, compact or json
        #[arg(long)]
        log_format: Option<String>,
    },

    /// Register a name and print incoming notifications until interrupted
    Register {
        /// Preferred address (1-255)
        #[arg(long, short)]
        address: u8,

        /// Name to register (defaults to the configured client name)
        #[arg(long, short)]
        name: Option<String>,
    },

    /// Send one notification
    Send {
        /// Receptor address
        #[arg(long, short)]
        to: u8,

        /// Emitter name (defaults to the configured client name)
        #[arg(long, short)]
        from: Option<String>,

        /// Message text
        message: String,
    },

    /// List registered names
    List {
        /// Maximum number of client entries (0 = all)
        #[arg(long, short = 'n', default_value_t = 0)]
        count: u8,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_serve() {
        let cli = Cli::try_parse_from(["notirouter", "serve", "-p", ":4000", "-n", "hub"]).unwrap();
        match cli.command {
            Command::Serve {
                port,
                name,
                log_format,
            } => {
                assert_eq!(port.as_deref(), Some(":4000"));
                assert_eq!(name.as_deref(), Some("hub"));
                assert!(log_format.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parse_send_with_global_flags() {
        let cli = Cli::try_parse_from([
            "notirouter",
            "send",
            "--to",
            "7",
            "--from",
            "cron",
            "backup done",
            "--server",
            "10.0.0.1:30106",
            "--timeout",
            "2",
        ])
        .unwrap();

        let config = RouterConfig::default();
        assert_eq!(cli.server_addr(&config), "10.0.0.1:30106");
        assert_eq!(cli.timeout(&config), Duration::from_secs(2));
        match cli.command {
            Command::Send { to, from, message } => {
                assert_eq!(to, 7);
                assert_eq!(from.as_deref(), Some("cron"));
                assert_eq!(message, "backup done");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn config_values_fill_missing_flags() {
        let cli = Cli::try_parse_from(["notirouter", "list", "--json"]).unwrap();
        let mut config = RouterConfig::default();
        config.client.server = "router.lan:30106".to_string();
        config.client.timeout = 9;

        assert_eq!(cli.server_addr(&config), "router.lan:30106");
        assert_eq!(cli.timeout(&config), Duration::from_secs(9));
        assert!(matches!(cli.command, Command::List { count: 0, json: true }));
    }

    #[test]
    fn address_must_fit_one_byte() {
        assert!(Cli::try_parse_from(["notirouter", "register", "--address", "256"]).is_err());
        assert!(Cli::try_parse_from(["notirouter", "register", "-a", "255", "-n", "x"]).is_ok());
    }
}
