//! HTTP delay symptom
//!
//! Blocks the current exchange's dispatch path for a configured duration —
//! a real timer-based suspension of just that exchange's task, never the
//! listener. `request_delay`/`response_delay` are in milliseconds; the
//! legacy single `delay` field is in seconds and applies on the response
//! leg only, preserved for backward compatibility.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::debug;

use crate::config::apply_config;
use crate::error::PluginError;
use crate::plugin::{Exchange, Middleware, ProxyEvent};
use crate::rules::{any_match, compile_rules, expand_default, CompiledRule, MatchingRule};

/// Configuration for [`HttpDelaySymptom`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpDelayConfig {
    /// Legacy delay in whole seconds, applied post-dispatch only when
    /// `response_delay` is unset.
    #[serde(default)]
    pub delay: u64,

    /// Delay in milliseconds before the request is forwarded upstream.
    #[serde(default)]
    pub request_delay: u64,

    /// Delay in milliseconds before the response is returned to the caller.
    #[serde(default)]
    pub response_delay: u64,

    /// Rules gating the delay; empty means delay every exchange.
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}

/// Delays matching HTTP exchanges on either leg of the round trip.
pub struct HttpDelaySymptom {
    config: HttpDelayConfig,
    rules: Vec<CompiledRule>,
}

impl HttpDelaySymptom {
    pub fn new(config: HttpDelayConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
        }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Middleware>, PluginError> {
        let config: HttpDelayConfig = apply_config(value)
            .map_err(|e| PluginError::invalid_config("http_delay", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }

    /// Rules after setup. Exposed for tests.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    async fn muck(&self, wait: Duration) {
        debug!("HTTP delay blocking exchange for {:?}", wait);
        sleep(wait).await;
    }
}

#[async_trait]
impl Middleware for HttpDelaySymptom {
    fn name(&self) -> &'static str {
        "http_delay"
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        debug!("HTTP delay setup");
        // No rules configured means delay everything: the configured list
        // is replaced by the catch-all, not appended to.
        self.rules = compile_rules(&expand_default(&self.config.matching_rules), self.name())?;
        Ok(())
    }

    async fn handle_event(&self, event: ProxyEvent, ctx: &mut Exchange) {
        if !any_match(&self.rules, ctx) {
            return;
        }

        match event {
            ProxyEvent::PreDispatch => {
                if self.config.request_delay > 0 {
                    self.muck(Duration::from_millis(self.config.request_delay)).await;
                }
            }
            ProxyEvent::PostDispatch => {
                if self.config.response_delay > 0 {
                    self.muck(Duration::from_millis(self.config.response_delay)).await;
                } else if self.config.delay > 0 {
                    self.muck(Duration::from_secs(self.config.delay)).await;
                }
            }
        }
    }

    fn teardown(&self) {
        debug!("HTTP delay teardown");
    }
}
