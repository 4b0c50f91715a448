//! CLI, router client, configuration file.
//!
//! This crate provides the `notirouter` command-line interface: `serve` runs
//! the router, the other subcommands talk to one over TCP.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod socket;

pub use cli::Cli;
pub use config::RouterConfig;
pub use error::{ClientError, ClientResult};
pub use socket::{ReceivedNotification, Registration, RouterClient};
