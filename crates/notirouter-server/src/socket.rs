//! TCP listener for the router.
//!
//! The listener only accepts and hands connections off; everything that
//! happens on a connection lives in [`crate::session`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// TCP server accepting router connections.
pub struct RouterServer {
    /// Server configuration.
    config: ServerConfig,
    /// TCP listener.
    listener: TcpListener,
    /// Semaphore for limiting concurrent connections.
    connection_semaphore: Arc<Semaphore>,
}

impl RouterServer {
    /// Validates the configuration and binds the listen address.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            server_name = %config.server_name,
            "Router listening"
        );

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            config,
            listener,
            connection_semaphore,
        })
    }

    /// Returns the address actually bound (useful with port 0).
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the configuration the server was bound with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts a single connection.
    ///
    /// Waits for a free connection permit before accepting.
    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServerError::config("connection limiter closed"))?;

        let (stream, peer_addr) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        // Registered clients may idle forever; keepalive lets the kernel
        // notice peers that vanished without a FIN.
        if let Some(idle) = self.config.keepalive {
            let keepalive = TcpKeepalive::new().with_time(idle);
            if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                debug!(error = %e, "Failed to enable TCP keepalive");
            }
        }
        debug!(peer = %peer_addr, "Accepted new connection");

        Ok(Connection {
            stream,
            peer_addr,
            _permit: permit,
        })
    }

    /// Runs the accept loop, spawning the handler for each connection.
    ///
    /// Accept errors are logged and never end the loop.
    pub async fn run<F, Fut>(&self, handler: F) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept().await {
                Ok(connection) => {
                    tokio::spawn(handler(connection));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Runs the accept loop until `shutdown` completes.
    pub async fn run_until_shutdown<F, Fut, S>(&self, handler: F, shutdown: S) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(handler) => result,
            _ = shutdown => {
                info!("Shutdown signal received, no longer accepting");
                Ok(())
            }
        }
    }
}

/// An accepted connection holding one connection permit.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    /// Splits the connection into its stream, remote address and permit.
    ///
    /// The permit must be kept alive for as long as the stream is in use.
    pub fn into_parts(self) -> (TcpStream, SocketAddr, OwnedSemaphorePermit) {
        (self.stream, self.peer_addr, self._permit)
    }
}
