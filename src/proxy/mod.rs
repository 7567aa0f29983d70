//! Protocol proxy engines
//!
//! Each engine is a plugin: it binds its own listener, builds an
//! [`crate::plugin::Exchange`] per inbound message, runs the middleware
//! chain at `PreDispatch`, forwards to the upstream target, captures the
//! response into the same exchange, runs `PostDispatch`, and emits the
//! (possibly mutated) result to the original caller.

use async_trait::async_trait;

use crate::error::{PluginError, ProxyError};
use crate::plugin::MiddlewareChain;

mod http;
mod tcp;
mod udp;

pub use http::{HttpProxy, HttpProxyConfig, ProxyRule, ProxyRuleMatch, ProxyRulePass};
pub use tcp::{TcpProxy, TcpProxyConfig};
pub use udp::{UdpProxy, UdpProxyConfig};

/// The contract implemented by every protocol proxy plugin.
#[async_trait]
pub trait Proxy: Send + Sync {
    /// The registry name of this proxy.
    fn name(&self) -> &'static str;

    /// Receive the middleware chain and compute derived state (compiled
    /// routing rules, TLS material paths).
    ///
    /// # Errors
    ///
    /// Returns `PluginError` on invalid configuration; this aborts startup.
    fn setup(&mut self, chain: MiddlewareChain) -> Result<(), PluginError>;

    /// Serve until the process shuts down.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` only for failures that prevent serving at all
    /// (e.g. the listener cannot bind). Per-connection failures are logged
    /// and contained.
    async fn run(&self) -> Result<(), ProxyError>;

    /// Log final statistics and release engine resources.
    fn teardown(&self);
}

pub(crate) fn default_host() -> String {
    "localhost".into()
}

pub(crate) fn default_packet_size() -> usize {
    64
}
