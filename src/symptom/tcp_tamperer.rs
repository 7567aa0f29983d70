//! TCP tamperer symptom
//!
//! Operates on raw byte payloads only; method/path/host matching does not
//! apply to byte-stream sessions. Three mutations are evaluated in
//! sequence — fixed body, randomize, truncate — and each unconditionally
//! overwrites the buffer when its flag is set, so with multiple flags
//! configured the last applicable mutation wins. This cascading-overwrite
//! order is inherited contract; do not collapse it into an if/else chain.

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tracing::debug;

use crate::config::apply_config;
use crate::error::PluginError;
use crate::plugin::{Exchange, Middleware, ProxyEvent};

/// Mutations for one direction of a TCP session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TcpTamperConfig {
    /// Fix the message to this exact body.
    #[serde(default)]
    pub body: String,

    /// Replace the message with random alphanumerics of the same length.
    #[serde(default)]
    pub randomize: bool,

    /// Drop trailing bytes from the message.
    #[serde(default)]
    pub truncate: bool,
}

/// Configuration for [`TcpTampererSymptom`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TcpTampererConfig {
    #[serde(default)]
    pub request: TcpTamperConfig,
    #[serde(default)]
    pub response: TcpTamperConfig,
}

/// Messes with raw request/response bytes between a consumer and provider.
pub struct TcpTampererSymptom {
    config: TcpTampererConfig,
}

impl TcpTampererSymptom {
    pub fn new(config: TcpTampererConfig) -> Self {
        Self { config }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Middleware>, PluginError> {
        let config: TcpTampererConfig = apply_config(value)
            .map_err(|e| PluginError::invalid_config("tcp_tamperer", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }

    /// Add chaos to the client -> upstream message.
    pub fn muck_request(&self, ctx: &mut Exchange) {
        let cfg = &self.config.request;
        let Some(bytes) = ctx.bytes.as_mut() else {
            return;
        };

        if !cfg.body.is_empty() {
            debug!(len = bytes.len(), "tamperer fixing request body");
            *bytes = cfg.body.clone().into_bytes();
        }
        if cfg.randomize {
            debug!(len = bytes.len(), "tamperer randomizing request body");
            *bytes = random_alphanumeric(bytes.len());
        }
        if cfg.truncate && bytes.len() >= 2 {
            // Request truncation drops 2 trailing bytes; the response side
            // drops 3. The asymmetry is inherited and preserved as-is.
            debug!(len = bytes.len(), "tamperer truncating request body");
            bytes.truncate(bytes.len() - 2);
        }
    }

    /// Add chaos to the upstream -> client message.
    pub fn muck_response(&self, ctx: &mut Exchange) {
        let cfg = &self.config.response;
        let Some(bytes) = ctx.bytes.as_mut() else {
            return;
        };

        if !cfg.body.is_empty() {
            debug!(len = bytes.len(), "tamperer fixing response body");
            *bytes = cfg.body.clone().into_bytes();
        }
        if cfg.randomize {
            debug!(len = bytes.len(), "tamperer randomizing response body");
            *bytes = random_alphanumeric(bytes.len());
        }
        if cfg.truncate && bytes.len() >= 3 {
            debug!(len = bytes.len(), "tamperer truncating response body");
            bytes.truncate(bytes.len() - 3);
        }
    }
}

/// Random alphanumeric payload of the given length.
fn random_alphanumeric(len: usize) -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .collect()
}

#[async_trait]
impl Middleware for TcpTampererSymptom {
    fn name(&self) -> &'static str {
        "tcp_tamperer"
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        debug!("TCP tamperer setup");
        Ok(())
    }

    async fn handle_event(&self, event: ProxyEvent, ctx: &mut Exchange) {
        match event {
            ProxyEvent::PreDispatch => self.muck_request(ctx),
            ProxyEvent::PostDispatch => self.muck_response(ctx),
        }
    }

    fn teardown(&self) {
        debug!("TCP tamperer teardown");
    }
}
