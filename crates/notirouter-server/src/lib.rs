//! Router: address registry, connection sessions, TCP listener.
//!
//! This crate provides the notirouter server that handles:
//! - A fixed 256-slot address registry with slot 0 reserved for the server
//! - One session per TCP connection, dispatching on the first byte
//! - Forwarding of notifications to the receptor's live connection
//! - Eviction of dead connections on close, on listing and periodically
//!
//! # Example
//!
//! ```rust,no_run
//! use notirouter_server::{
//!     RouterServer, ServerConfig, SessionHandler, SignalHandler, make_connection_handler,
//!     new_shared_registry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new(":30106");
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener();
//!
//!     let server = RouterServer::bind(config).await?;
//!     let registry = new_shared_registry(&server.config().server_name);
//!     let handler = SessionHandler::new(registry, server.config(), signals.shutdown_handle());
//!
//!     let shutdown = signals.shutdown_handle().signal();
//!     server
//!         .run_until_shutdown(make_connection_handler(handler), shutdown.wait())
//!         .await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod registry;
mod session;
mod signals;
mod socket;
mod sweeper;

pub use config::{DEFAULT_LISTEN_ADDR, DEFAULT_SERVER_NAME, ServerConfig, normalize_listen_addr};
pub use error::{ServerError, ServerResult, SessionError, SessionResult};
pub use registry::{Liveness, Registry, SLOT_COUNT, UserRecord};
pub use session::{Peer, SessionHandler, SharedRegistry, make_connection_handler, new_shared_registry};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
pub use socket::{Connection, RouterServer};
pub use sweeper::Sweeper;
