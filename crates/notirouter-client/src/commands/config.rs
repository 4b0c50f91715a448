//! Configuration commands.

use std::path::{Path, PathBuf};

use crate::config::RouterConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &RouterConfig, path: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", path.display());
    println!("{}", toml_str);

    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &RouterConfig) -> ClientResult<()> {
    config.validate().map_err(ClientError::Config)?;
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> ClientResult<()> {
    let exists = if path.exists() { "" } else { " (not found, using defaults)" };
    println!("config: {}{}", path.display(), exists);
    Ok(())
}

/// Resolves the configuration file in effect.
pub fn effective_path(explicit: Option<&PathBuf>) -> PathBuf {
    explicit.cloned().unwrap_or_else(RouterConfig::default_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dumped_config_parses_back() {
        let mut config = RouterConfig::default();
        config.server.name = "hub".to_string();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: RouterConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.name, "hub");
        assert_eq!(parsed.client.server, config.client.server);
    }

    #[test]
    fn validate_surfaces_config_errors() {
        let mut config = RouterConfig::default();
        config.client.timeout = 0;
        assert!(matches!(validate(&config), Err(ClientError::Config(_))));
    }

    #[test]
    fn explicit_path_wins() {
        let explicit = PathBuf::from("/tmp/router.toml");
        assert_eq!(effective_path(Some(&explicit)), explicit);
        assert_eq!(effective_path(None), RouterConfig::default_path());
    }
}
