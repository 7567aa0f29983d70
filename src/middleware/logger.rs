//! Logger middleware
//!
//! Observes every exchange without mutating it: HTTP events log the method,
//! URL and response status; byte-stream events log payload sizes at info
//! and the payload itself at debug, rendered as hex when `hex_output` is
//! set.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::apply_config;
use crate::error::PluginError;
use crate::plugin::{Exchange, Middleware, ProxyEvent};

/// Configuration for [`LoggerMiddleware`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggerConfig {
    /// Render raw payloads as hex instead of lossy UTF-8.
    #[serde(default)]
    pub hex_output: bool,
}

/// Logs all requests and responses flowing through the proxies.
pub struct LoggerMiddleware {
    config: LoggerConfig,
}

impl LoggerMiddleware {
    pub fn new(config: LoggerConfig) -> Self {
        Self { config }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Middleware>, PluginError> {
        let config: LoggerConfig =
            apply_config(value).map_err(|e| PluginError::invalid_config("logger", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }

    fn render(&self, bytes: &[u8]) -> String {
        if self.config.hex_output {
            bytes.iter().map(|b| format!("{b:02x}")).collect()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[async_trait]
impl Middleware for LoggerMiddleware {
    fn name(&self) -> &'static str {
        "logger"
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn handle_event(&self, event: ProxyEvent, ctx: &mut Exchange) {
        match event {
            ProxyEvent::PreDispatch => {
                if let Some(request) = &ctx.request {
                    info!(
                        method = %request.method,
                        url = %request.url(),
                        "handle HTTP event PRE_DISPATCH: proxying request"
                    );
                } else if let Some(bytes) = &ctx.bytes {
                    if !bytes.is_empty() {
                        info!(len = bytes.len(), "handle TCP event PRE_DISPATCH: received request");
                        debug!(payload = %self.render(bytes), "request payload");
                    }
                }
            }
            ProxyEvent::PostDispatch => {
                if let Some(response) = &ctx.response {
                    info!(
                        status = %response.status,
                        "handle HTTP event POST_DISPATCH: returning response"
                    );
                } else if let Some(bytes) = &ctx.bytes {
                    if !bytes.is_empty() {
                        info!(len = bytes.len(), "handle TCP event POST_DISPATCH: sent response");
                        debug!(payload = %self.render(bytes), "response payload");
                    }
                }
            }
        }
    }

    fn teardown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_and_hex() {
        let plain = LoggerMiddleware::new(LoggerConfig { hex_output: false });
        assert_eq!(plain.render(b"abc"), "abc");

        let hex = LoggerMiddleware::new(LoggerConfig { hex_output: true });
        assert_eq!(hex.render(b"\x01\xff"), "01ff");
    }

    #[tokio::test]
    async fn test_logger_never_mutates_the_exchange() {
        let logger = LoggerMiddleware::new(LoggerConfig::default());
        let mut ctx = Exchange::for_bytes(b"payload".to_vec());

        logger.handle_event(ProxyEvent::PreDispatch, &mut ctx).await;
        logger.handle_event(ProxyEvent::PostDispatch, &mut ctx).await;

        assert_eq!(ctx.bytes.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_from_config() {
        let value: serde_yaml::Value = serde_yaml::from_str("hex_output: true").unwrap();
        assert!(LoggerMiddleware::from_config(&value).is_ok());
    }
}
