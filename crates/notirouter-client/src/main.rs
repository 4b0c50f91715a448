//! notirouter CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::{Level, debug};

use notirouter_client::cli::{Cli, Command, ConfigAction};
use notirouter_client::commands;
use notirouter_client::config::RouterConfig;
use notirouter_client::error::{ClientError, ClientResult};
use notirouter_client::socket::RouterClient;
use notirouter_core::{LoggingConfig, LoggingFormat, init_logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn logging_config(cli: &Cli, config: &RouterConfig) -> ClientResult<LoggingConfig> {
    let debug = cli.debug_enabled(config);
    let Command::Serve { log_format, .. } = &cli.command else {
        return Ok(LoggingConfig::cli(debug));
    };

    let format: LoggingFormat = log_format
        .as_deref()
        .unwrap_or(&config.server.log_format)
        .parse()?;
    let mut logging = LoggingConfig::daemon().with_format(format);
    if debug {
        logging = logging.with_level(Level::DEBUG);
    }
    Ok(logging)
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = commands::config::effective_path(cli.config.as_ref());
    let config = if cli.config.is_some() {
        RouterConfig::load_from(&config_path).map_err(ClientError::Config)?
    } else {
        RouterConfig::load().map_err(ClientError::Config)?
    };

    init_logging(logging_config(&cli, &config)?)?;
    debug!(path = %config_path.display(), "configuration loaded");

    let client = RouterClient::new(cli.server_addr(&config), cli.timeout(&config));

    match &cli.command {
        Command::Serve { port, name, .. } => {
            let server_config = commands::server::server_config(
                &config.server,
                port.as_deref(),
                name.as_deref(),
            );
            commands::server::run(server_config).await
        }
        Command::Register { address, name } => {
            let name = name.as_deref().unwrap_or(&config.client.name);
            commands::messaging::register(&client, *address, name).await
        }
        Command::Send { to, from, message } => {
            let from = from.as_deref().unwrap_or(&config.client.name);
            commands::messaging::send(&client, *to, from, message).await
        }
        Command::List { count, json } => commands::messaging::list(&client, *count, *json).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path),
        },
    }
}
