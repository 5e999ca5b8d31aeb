//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: redirect={}, max_connections={}",
        config.router.redirect_target(),
        config.router.max_connections
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `TUN_RELAY_REDIRECT_HOST`: Override redirect host
/// - `TUN_RELAY_REDIRECT_PORT`: Override redirect port
/// - `TUN_RELAY_MAX_CONNECTIONS`: Override max concurrent sessions
/// - `TUN_RELAY_LOG_LEVEL`: Override log level
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides looked up through `lookup`, then re-validate
///
/// Split out from [`load_config_with_env`] so the override rules can be
/// exercised without touching the process environment.
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for unparsable values.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("TUN_RELAY_REDIRECT_HOST") {
        config.router.redirect_host = host;
        debug!("Redirect host overridden to {}", config.router.redirect_host);
    }

    if let Some(port) = lookup("TUN_RELAY_REDIRECT_PORT") {
        config.router.redirect_port = port.parse().map_err(|_| ConfigError::EnvError {
            name: "TUN_RELAY_REDIRECT_PORT".into(),
            reason: format!("Invalid port: {port}"),
        })?;
        debug!("Redirect port overridden to {}", config.router.redirect_port);
    }

    if let Some(max) = lookup("TUN_RELAY_MAX_CONNECTIONS") {
        config.router.max_connections = max.parse().map_err(|_| ConfigError::EnvError {
            name: "TUN_RELAY_MAX_CONNECTIONS".into(),
            reason: format!("Invalid number: {max}"),
        })?;
        debug!(
            "Max connections overridden to {}",
            config.router.max_connections
        );
    }

    if let Some(level) = lookup("TUN_RELAY_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    // Re-validate after overrides
    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
