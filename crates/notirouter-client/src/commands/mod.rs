//! Subcommand implementations.

pub mod config;
pub mod messaging;
pub mod server;
