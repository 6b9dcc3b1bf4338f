use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SUPPORTED_VERSION: &str = "1.0";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Database path from the config, or the default location.
pub fn resolve_database_path(config: &Config) -> Result<PathBuf, ConfigError> {
    match config.database_path.as_deref() {
        Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => crate::db::default_database_path().ok_or_else(|| ConfigError::Validation {
            message: "No database_path set and home directory is unknown".to_string(),
        }),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.ai.timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "ai.timeout_secs must be greater than 0".to_string(),
        });
    }

    if config.ai.enabled {
        if config.ai.model.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "ai.model must not be empty".to_string(),
            });
        }
        if !config.ai.endpoint.starts_with("http://") && !config.ai.endpoint.starts_with("https://")
        {
            return Err(ConfigError::Validation {
                message: format!("ai.endpoint must be an http(s) URL: {}", config.ai.endpoint),
            });
        }
    }

    // Accept plain levels only; full directives belong in RUST_LOG.
    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown logging.level: {}", config.logging.level),
        });
    }

    Ok(())
}
