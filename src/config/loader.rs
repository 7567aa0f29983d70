//! Configuration loading
//!
//! The loader is the boundary between raw YAML and typed plugin
//! configuration: [`load_config`] parses the top-level file, and
//! [`apply_config`] decodes a plugin's raw section into its typed config
//! struct. Required fields with no default surface as a validation error at
//! load time; fields with `#[serde(default…)]` are auto-filled — the
//! declarative equivalent of the required/default field-tag contract.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::types::AppConfig;
use crate::error::ConfigError;

/// Load configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config = load_config_str(&contents)?;

    info!(
        "Configuration loaded: {} proxies, {} middleware",
        config.proxy.len(),
        config.middleware.len()
    );

    Ok(config)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns `ConfigError` if parsing fails.
pub fn load_config_str(yaml: &str) -> Result<AppConfig, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Decode a plugin's raw YAML section into its typed configuration.
///
/// A null/absent section decodes as an empty mapping so that configs whose
/// fields all carry defaults need no `config:` block at all.
///
/// # Errors
///
/// Returns `ConfigError::Validation` when a required field is missing or a
/// field has the wrong shape.
pub fn apply_config<T: DeserializeOwned>(value: &serde_yaml::Value) -> Result<T, ConfigError> {
    let value = if value.is_null() {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
    } else {
        value.clone()
    };

    serde_yaml::from_value(value).map_err(|e| ConfigError::Validation(e.to_string()))
}
