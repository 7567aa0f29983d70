//! Top-level configuration structures

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// ```yaml
/// name: chaos rig
/// description: slow down the checkout API
/// loglevel: 2
/// proxy:
///   - name: http_proxy
///     config:
///       host: localhost
///       port: 8181
///       proxy_host: localhost
///       proxy_port: 8282
/// middleware:
///   - name: logger
///     config:
///       hex_output: false
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Application name, informational only
    #[serde(default)]
    pub name: String,

    /// Free-form description, informational only
    #[serde(default)]
    pub description: String,

    /// Log level: 0 = trace, 1 = debug, 2 = info, 3 = warn, 4 = error
    #[serde(default = "default_log_level")]
    pub loglevel: u8,

    /// Ordered proxy plugin sections; each starts its own listener
    #[serde(default)]
    pub proxy: Vec<PluginSection>,

    /// Ordered middleware plugin sections; order is execution order
    #[serde(default)]
    pub middleware: Vec<PluginSection>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            loglevel: default_log_level(),
            proxy: Vec::new(),
            middleware: Vec::new(),
        }
    }
}

/// One plugin declaration: a registry name plus its raw nested config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginSection {
    /// Name used to look the plugin up in the registry
    pub name: String,

    /// Raw configuration handed to the plugin's constructor
    #[serde(default)]
    pub config: serde_yaml::Value,
}

fn default_log_level() -> u8 {
    2
}
