//! HTTP error symptom
//!
//! Short-circuits matching requests with a configured status code instead
//! of proxying them upstream. Unlike the fail-open symptoms, producing the
//! error *is* the point: when this symptom installs a response during
//! `PreDispatch`, the HTTP engine skips the upstream leg entirely and the
//! chain's `PostDispatch` runs against the synthetic response.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::debug;

use crate::config::apply_config;
use crate::error::PluginError;
use crate::plugin::{Exchange, HttpExchangeResponse, Middleware, ProxyEvent};
use crate::rules::{any_match, compile_rules, expand_default, CompiledRule, MatchingRule};

/// Configuration for [`HttpErrorSymptom`].
#[derive(Debug, Clone, Deserialize)]
pub struct HttpErrorConfig {
    /// Status code to respond with (e.g. 503).
    pub status: u16,

    /// Response body to attach.
    #[serde(default)]
    pub body: String,

    /// Seconds to wait before producing the error.
    #[serde(default)]
    pub delay: u64,

    /// Rules gating the error; empty means every exchange errors.
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}

/// Responds to matching requests with a fixed error, never reaching the
/// upstream.
pub struct HttpErrorSymptom {
    config: HttpErrorConfig,
    status: StatusCode,
    rules: Vec<CompiledRule>,
}

impl HttpErrorSymptom {
    pub fn new(config: HttpErrorConfig) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            config,
            rules: Vec::new(),
        }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode (`status`
    /// is required).
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Middleware>, PluginError> {
        let config: HttpErrorConfig = apply_config(value)
            .map_err(|e| PluginError::invalid_config("http_error", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }
}

#[async_trait]
impl Middleware for HttpErrorSymptom {
    fn name(&self) -> &'static str {
        "http_error"
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        debug!("HTTP error setup");
        self.status = StatusCode::from_u16(self.config.status).map_err(|_| {
            PluginError::setup(self.name(), format!("invalid status code {}", self.config.status))
        })?;
        self.rules = compile_rules(&expand_default(&self.config.matching_rules), self.name())?;
        Ok(())
    }

    async fn handle_event(&self, event: ProxyEvent, ctx: &mut Exchange) {
        if event != ProxyEvent::PreDispatch || !ctx.is_http() {
            return;
        }
        if !any_match(&self.rules, ctx) {
            return;
        }

        if self.config.delay > 0 {
            sleep(Duration::from_secs(self.config.delay)).await;
        }

        debug!(status = %self.status, "HTTP error short-circuiting exchange");
        ctx.response = Some(HttpExchangeResponse::new(
            self.status,
            self.config.body.clone().into_bytes(),
        ));
    }

    fn teardown(&self) {
        debug!("HTTP error teardown");
    }
}
