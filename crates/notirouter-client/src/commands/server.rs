//! Serve command: runs the router in the foreground.
//!
//! Startup order:
//! - signal handler (SIGTERM/SIGINT for shutdown)
//! - listener bound to the configured address
//! - registry with the server entry in slot 0
//! - sweeper, unless disabled
//! - accept loop until shutdown

use std::time::Duration;

use tracing::{info, warn};

use notirouter_server::{
    RouterServer, ServerConfig, SessionHandler, SignalHandler, Sweeper, make_connection_handler,
    new_shared_registry,
};

use crate::config::ServerSettings;
use crate::error::{ClientError, ClientResult};

/// Turns a `--port` value into a listen address.
///
/// Accepts `host:port`, `:port` and a bare port number.
pub fn listen_address(port: &str) -> String {
    let port = port.trim();
    if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
        format!(":{}", port)
    } else {
        port.to_string()
    }
}

/// Merges command-line overrides into the file settings.
pub fn server_config(
    settings: &ServerSettings,
    port: Option<&str>,
    name: Option<&str>,
) -> ServerConfig {
    let mut config = settings.to_server_config();
    if let Some(port) = port {
        config = ServerConfig {
            listen_addr: ServerConfig::new(listen_address(port)).listen_addr,
            ..config
        };
    }
    if let Some(name) = name {
        config = config.with_server_name(name);
    }
    config
}

/// Runs the router until a shutdown signal is received.
pub async fn run(config: ServerConfig) -> ClientResult<()> {
    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let server = RouterServer::bind(config)
        .await
        .map_err(|e| ClientError::Config(format!("failed to start router: {}", e)))?;
    let config = server.config().clone();

    let registry = new_shared_registry(&config.server_name);
    let handler = SessionHandler::new(
        registry.clone(),
        &config,
        signal_handler.shutdown_handle(),
    );

    let sweeper_task = config.sweep_interval.map(|interval| {
        Sweeper::new(registry.clone(), interval).spawn(signal_handler.shutdown_handle())
    });

    let shutdown = signal_handler.shutdown_handle().signal();
    server
        .run_until_shutdown(make_connection_handler(handler), shutdown.wait())
        .await
        .map_err(|e| ClientError::Config(format!("router error: {}", e)))?;

    info!("Shutting down...");
    if let Some(task) = sweeper_task
        && tokio::time::timeout(Duration::from_secs(5), task).await.is_err()
    {
        warn!("Sweeper did not stop in time");
    }

    info!(registered = registry.len().await - 1, "Router stopped");
    Ok(())
}
