//! Server configuration.

use std::time::Duration;

use crate::error::{ServerError, ServerResult};

/// Listen address used when none is configured.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:30106";

/// Display name of the reserved server entry.
pub const DEFAULT_SERVER_NAME: &str = "Server";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to (`host:port`).
    pub listen_addr: String,

    /// Name stored in the reserved slot 0.
    pub server_name: String,

    /// How long an unregistered connection may stay silent.
    pub read_timeout: Duration,

    /// Upper bound for a single reply or forward write.
    pub write_timeout: Duration,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Period of the background eviction sweep (`None` disables it).
    pub sweep_interval: Option<Duration>,

    /// Idle time before TCP keepalive kicks in on accepted connections
    /// (`None` leaves keepalive off).
    pub keepalive: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            max_connections: 512,
            sweep_interval: Some(Duration::from_secs(60)),
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration listening on the given address.
    ///
    /// A bare `:port` means every interface.
    pub fn new(listen_addr: impl AsRef<str>) -> Self {
        Self {
            listen_addr: normalize_listen_addr(listen_addr.as_ref()),
            ..Default::default()
        }
    }

    /// Builder: set the server display name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Builder: set read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Builder: set write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Builder: set the TCP keepalive idle time.
    pub fn with_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Checks the values the router cannot start without.
    pub fn validate(&self) -> ServerResult<()> {
        let port = self
            .listen_addr
            .rsplit_once(':')
            .map(|(_, port)| port)
            .unwrap_or_default();
        if port.parse::<u16>().is_err() {
            return Err(ServerError::invalid_listen_address(&self.listen_addr));
        }
        if self.server_name.is_empty() {
            return Err(ServerError::config("server name must not be empty"));
        }
        if self.server_name.len() > notirouter_protocol::MAX_NAME_LEN {
            return Err(ServerError::config(format!(
                "server name is longer than {} bytes",
                notirouter_protocol::MAX_NAME_LEN
            )));
        }
        if self.max_connections == 0 {
            return Err(ServerError::config("max_connections must be at least 1"));
        }
        if self.sweep_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(ServerError::config("sweep interval must be positive"));
        }
        if self.keepalive.is_some_and(|idle| idle.is_zero()) {
            return Err(ServerError::config("keepalive must be positive"));
        }
        Ok(())
    }
}

/// Expands a bare `:port` into `0.0.0.0:port`.
pub fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
