//! Plugin contract and dispatch pipeline
//!
//! Every chaos symptom and observer middleware implements the same
//! three-method capability set: [`Middleware::setup`] once after
//! configuration has been applied, [`Middleware::handle_event`] for every
//! lifecycle event of every exchange, and [`Middleware::teardown`] once at
//! process shutdown.
//!
//! Plugins are executed in configured order, synchronously with respect to
//! one another: a plugin's `handle_event` completes before the next plugin
//! in the chain runs, so a tamperer that replaces a body runs before or
//! after a logger depending entirely on declared order.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::PluginError;

mod context;
mod registry;

pub use context::{Exchange, HttpExchangeRequest, HttpExchangeResponse};
pub use registry::{MiddlewareConstructor, PluginRegistry, ProxyConstructor};

/// Lifecycle events fired by the proxy engines.
///
/// `PreDispatch` fires after an inbound message is received, before it is
/// forwarded upstream. `PostDispatch` fires after the upstream response (or
/// response segment) is received, before it is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyEvent {
    PreDispatch,
    PostDispatch,
}

impl std::fmt::Display for ProxyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreDispatch => write!(f, "PRE_DISPATCH"),
            Self::PostDispatch => write!(f, "POST_DISPATCH"),
        }
    }
}

/// The contract implemented by every symptom and middleware plugin.
///
/// `handle_event` is infallible at the signature level: a plugin that hits
/// an internal error logs it and treats the event as a no-op — chaos
/// injection failing must not prevent the underlying traffic from
/// completing. Fatal problems (bad regex, malformed shaping targets) belong
/// in `setup`, which aborts startup.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// The registry name of this plugin.
    fn name(&self) -> &'static str;

    /// Compute derived state once configuration has been applied.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` on invalid configuration; this aborts startup.
    fn setup(&mut self) -> Result<(), PluginError>;

    /// Intervene with a request/response event.
    ///
    /// The exchange may be mutated in place; the same instance flows from
    /// `PreDispatch` to `PostDispatch` so tamper effects compose.
    async fn handle_event(&self, event: ProxyEvent, ctx: &mut Exchange);

    /// Release held resources. Invoked once at process shutdown.
    fn teardown(&self);
}

/// An ordered, shareable middleware chain.
pub type MiddlewareChain = Vec<Arc<dyn Middleware>>;

/// Run an exchange through the chain for the given event, in declared order.
pub async fn dispatch(chain: &[Arc<dyn Middleware>], event: ProxyEvent, ctx: &mut Exchange) {
    for mw in chain {
        trace!(plugin = mw.name(), %event, "dispatching event");
        mw.handle_event(event, ctx).await;
    }
}
