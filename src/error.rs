//! Error types for faultline
//!
//! Errors are categorized by subsystem. Startup errors (configuration,
//! plugin instantiation, listener binding) abort the process before any
//! traffic is served; steady-state errors are contained to the affected
//! connection or exchange and logged.

use std::io;

use thiserror::Error;

/// Top-level error type for faultline
#[derive(Debug, Error)]
pub enum FaultlineError {
    /// Configuration errors (file reading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plugin loading and setup errors
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Proxy engine errors
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// TLS configuration errors
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors
///
/// These are always fatal: a misconfigured proxy never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// YAML parsing error
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Validation error (missing required fields, invalid values)
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    Io(#[from] io::Error),
}

/// Plugin lifecycle errors
#[derive(Debug, Error)]
pub enum PluginError {
    /// Configuration names a plugin missing from the registry
    #[error("Unknown {kind} plugin: '{name}' is not registered")]
    UnknownPlugin { kind: &'static str, name: String },

    /// Plugin configuration section failed to decode or validate
    #[error("Invalid configuration for plugin '{plugin}': {reason}")]
    InvalidConfig { plugin: &'static str, reason: String },

    /// Plugin setup failed (derived state could not be computed)
    #[error("Setup failed for plugin '{plugin}': {reason}")]
    Setup { plugin: &'static str, reason: String },
}

impl PluginError {
    /// Create an invalid-config error
    pub fn invalid_config(plugin: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            plugin,
            reason: reason.into(),
        }
    }

    /// Create a setup error
    pub fn setup(plugin: &'static str, reason: impl Into<String>) -> Self {
        Self::Setup {
            plugin,
            reason: reason.into(),
        }
    }
}

/// Proxy engine errors
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind the listening socket
    #[error("Failed to bind to {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// Failed to connect to the upstream target
    #[error("Failed to reach upstream {addr}: {reason}")]
    Upstream { addr: String, reason: String },

    /// HTTP serving error
    #[error("HTTP serving error: {0}")]
    Http(String),

    /// TLS termination or dialing error
    #[error("Proxy TLS error: {0}")]
    Tls(#[from] TlsError),

    /// I/O error during proxying
    #[error("Proxy I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Create a bind error
    pub fn bind(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bind {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

/// TLS configuration errors
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate file unreadable or empty
    #[error("Failed to read certificate from {path}: {reason}")]
    Certificate { path: String, reason: String },

    /// Private key file unreadable or empty
    #[error("Failed to read private key from {path}: {reason}")]
    PrivateKey { path: String, reason: String },

    /// rustls rejected the assembled configuration
    #[error("Invalid TLS configuration: {0}")]
    Config(String),
}

/// Type alias for Result with `FaultlineError`
pub type Result<T> = std::result::Result<T, FaultlineError>;
