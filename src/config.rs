use crate::connection::ConnectionRegistry;
use crate::core::{ForgeConfig, ForgeError};
use log::debug;
use std::path::PathBuf;

// this file will be baked into binary as default if no --config option is used
const DEFAULT_CONFIG_STR: &str = include_str!("../config/default.toml");

/// load config file
pub fn load_config(user_path: Option<PathBuf>) -> Result<ForgeConfig, ForgeError> {
    let config_content = match &user_path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| ForgeError::Config(format!("{}: {e}", path.display())))?,
        None => DEFAULT_CONFIG_STR.to_string(),
    };

    let config: ForgeConfig = toml::from_str(&config_content)
        .map_err(|e| ForgeError::Config(format!("{}: {e}", get_config_file_path(user_path))))?;
    Ok(config)
}

#[must_use]
pub fn get_config_file_path(user_path: Option<PathBuf>) -> String {
    match user_path {
        Some(path) => path.to_string_lossy().to_string(),
        None => "<built-in config/default.toml>".to_string(),
    }
}

/// Loads `.env` (if any) and reads the Source/Destination registry.
pub fn load_registry() -> Result<ConnectionRegistry, ForgeError> {
    if let Ok(path) = dotenv::dotenv() {
        debug!("loaded environment from {}", path.display());
    }
    let registry = ConnectionRegistry::from_env()?;
    debug!(
        "connection registry: source {}, destination {}",
        registry.source.as_ref().map_or("unset".to_string(), |d| d.redacted()),
        registry.destination.as_ref().map_or("unset".to_string(), |d| d.redacted())
    );
    Ok(registry)
}
