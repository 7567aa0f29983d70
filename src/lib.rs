//! faultline: a configurable fault-injection proxy
//!
//! faultline sits between a client and a target service, forwarding traffic
//! across HTTP, TCP and UDP while pluggable *symptoms* (chaos behaviours:
//! delay, tampering, error injection, bandwidth shaping) and *middleware*
//! (cross-cutting observers such as logging) intercept and mutate traffic at
//! two well-defined points in the request/response lifecycle.
//!
//! # Architecture
//!
//! ```text
//! Client → Proxy Engine (HTTP/TCP/UDP) → Middleware chain (PreDispatch)
//!              ↓
//!          Upstream target ← forwarded (possibly mutated) request
//!              ↓
//!          Response → Middleware chain (PostDispatch) → Client
//! ```
//!
//! Every plugin — symptom or middleware — implements the same three-method
//! contract (`setup`, `handle_event`, `teardown`) and is instantiated from
//! YAML configuration through a name-keyed [`plugin::PluginRegistry`].
//!
//! # Quick Start
//!
//! ```no_run
//! use faultline::config::load_config;
//! use faultline::orchestrator::Faultline;
//! use faultline::plugin::PluginRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("config.yml")?;
//! let registry = PluginRegistry::builtin();
//!
//! Faultline::new(config)
//!     .run(&registry, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration types and loading
//! - [`error`]: Error types
//! - [`middleware`]: Built-in observer middleware (logger)
//! - [`orchestrator`]: Plugin loading and coordinated startup/shutdown
//! - [`plugin`]: Exchange context, plugin contract and registry
//! - [`proxy`]: Protocol proxy engines (HTTP, TCP, UDP)
//! - [`rules`]: Declarative request-matching engine
//! - [`shaper`]: Network Shaper collaborator interface
//! - [`symptom`]: Built-in chaos symptoms
//! - [`tls`]: Certificate Provider collaborator

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod middleware;
pub mod orchestrator;
pub mod plugin;
pub mod proxy;
pub mod rules;
pub mod shaper;
pub mod symptom;
pub mod tls;

// Re-export commonly used types at the crate root
pub use config::{load_config, AppConfig, PluginSection};
pub use error::{ConfigError, FaultlineError, PluginError, ProxyError, TlsError};
pub use orchestrator::Faultline;
pub use plugin::{Exchange, Middleware, PluginRegistry, ProxyEvent};
pub use proxy::Proxy;
pub use rules::MatchingRule;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
