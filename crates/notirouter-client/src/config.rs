//! Configuration file.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/notirouter/config.toml` by default. Every key is optional;
//! command-line flags override whatever the file says.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use notirouter_protocol::MAX_NAME_LEN;
use notirouter_server::{DEFAULT_LISTEN_ADDR, DEFAULT_SERVER_NAME, ServerConfig};

/// Address client commands connect to when nothing else is configured.
pub const DEFAULT_ROUTER_ADDR: &str = "127.0.0.1:30106";

/// Configuration for the notirouter binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Debug mode.
    pub debug: bool,

    /// Settings used by `notirouter serve`.
    pub server: ServerSettings,

    /// Settings used by the client commands.
    pub client: ClientSettings,
}

/// Router settings (`[server]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address; a bare `:port` binds every interface.
    pub listen: String,

    /// Name of the reserved server entry.
    pub name: String,

    /// Read timeout for unregistered connections, in seconds.
    pub read_timeout_secs: u64,

    /// Write timeout, in seconds.
    pub write_timeout_secs: u64,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Background sweep period in seconds; 0 disables the sweeper.
    pub sweep_interval_secs: u64,

    /// TCP keepalive idle time in seconds; 0 turns keepalive off.
    pub keepalive_secs: u64,

    /// Log output format (`pretty`, `compact` or `json`).
    pub log_format: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            name: DEFAULT_SERVER_NAME.to_string(),
            read_timeout_secs: defaults.read_timeout.as_secs(),
            write_timeout_secs: defaults.write_timeout.as_secs(),
            max_connections: defaults.max_connections,
            sweep_interval_secs: defaults.sweep_interval.map_or(0, |d| d.as_secs()),
            keepalive_secs: defaults.keepalive.map_or(0, |d| d.as_secs()),
            log_format: "compact".to_string(),
        }
    }
}

impl ServerSettings {
    /// Builds the router configuration these settings describe.
    pub fn to_server_config(&self) -> ServerConfig {
        let sweep = (self.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.sweep_interval_secs));
        let keepalive =
            (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs));

        ServerConfig::new(&self.listen)
            .with_server_name(&self.name)
            .with_read_timeout(Duration::from_secs(self.read_timeout_secs))
            .with_write_timeout(Duration::from_secs(self.write_timeout_secs))
            .with_max_connections(self.max_connections)
            .with_sweep_interval(sweep)
            .with_keepalive(keepalive)
    }
}

/// Client command settings (`[client]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Router address (`host:port`).
    pub server: String,

    /// Connect and reply timeout in seconds.
    pub timeout: u64,

    /// Name used for `register` and as the emitter of `send`.
    pub name: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server: DEFAULT_ROUTER_ADDR.to_string(),
            timeout: 5,
            name: "notirouter".to_string(),
        }
    }
}

impl RouterConfig {
    /// Loads configuration from the default path, or defaults if it is absent.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notirouter")
    }

    /// Checks every value a command would reject at run time.
    pub fn validate(&self) -> Result<(), String> {
        self.server
            .to_server_config()
            .validate()
            .map_err(|e| format!("[server] {}", e))?;
        if self.server.read_timeout_secs == 0 || self.server.write_timeout_secs == 0 {
            return Err("[server] timeouts must be at least one second".to_string());
        }
        self.server
            .log_format
            .parse::<notirouter_core::LoggingFormat>()
            .map_err(|e| format!("[server] {}", e))?;

        let port = self
            .client
            .server
            .rsplit_once(':')
            .map(|(_, port)| port)
            .unwrap_or_default();
        if port.parse::<u16>().is_err() {
            return Err(format!(
                "[client] server must be host:port, got {:?}",
                self.client.server
            ));
        }
        if self.client.timeout == 0 {
            return Err("[client] timeout must be at least one second".to_string());
        }
        if self.client.name.len() > MAX_NAME_LEN {
            return Err(format!(
                "[client] name is longer than {} bytes",
                MAX_NAME_LEN
            ));
        }
        Ok(())
    }
}
