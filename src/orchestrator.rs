//! Orchestrator: wires configuration to running plugin instances
//!
//! Loads middleware and proxies through the registry, runs `setup` in
//! declared order (middleware first, then each proxy receives the shared
//! chain), starts every proxy engine as an independent task, and on
//! shutdown calls `teardown` on every middleware in registered order. Proxy
//! listener loops are abandoned rather than drained; in-flight exchanges do
//! not survive shutdown.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{FaultlineError, PluginError};
use crate::plugin::{Middleware, PluginRegistry};
use crate::proxy::Proxy;

/// The main orchestration component.
pub struct Faultline {
    config: AppConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
    proxies: Vec<Arc<dyn Proxy>>,
}

impl Faultline {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            middlewares: Vec::new(),
            proxies: Vec::new(),
        }
    }

    /// Instantiate and set up every configured plugin.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError` on the first unknown plugin name, config
    /// decode failure, or setup failure — the process cannot start with a
    /// partial plugin set.
    pub fn load_plugins(&mut self, registry: &PluginRegistry) -> Result<(), FaultlineError> {
        for section in &self.config.middleware {
            let constructor = registry.lookup_middleware(&section.name).ok_or_else(|| {
                PluginError::UnknownPlugin {
                    kind: "middleware",
                    name: section.name.clone(),
                }
            })?;

            info!("Loading plugin \t{}", section.name);
            let mut plugin = constructor(&section.config)?;
            plugin.setup()?;
            self.middlewares.push(Arc::from(plugin));
        }

        for section in &self.config.proxy {
            let constructor = registry.lookup_proxy(&section.name).ok_or_else(|| {
                PluginError::UnknownPlugin {
                    kind: "proxy",
                    name: section.name.clone(),
                }
            })?;

            info!("Loading proxy \t{}", section.name);
            let mut proxy = constructor(&section.config)?;
            proxy.setup(self.middlewares.clone())?;
            self.proxies.push(Arc::from(proxy));
        }

        Ok(())
    }

    /// Loaded middleware instances. Exposed for tests.
    pub fn middleware_count(&self) -> usize {
        self.middlewares.len()
    }

    /// Loaded proxy instances. Exposed for tests.
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Run the mucking proxy: load plugins, start every engine, block until
    /// `shutdown` resolves, then tear down.
    ///
    /// # Errors
    ///
    /// Returns `FaultlineError` on any fatal startup error. Engine failures
    /// after startup are logged; the remaining proxies keep serving.
    pub async fn run(
        mut self,
        registry: &PluginRegistry,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), FaultlineError> {
        self.load_plugins(registry)?;

        let mut tasks = Vec::with_capacity(self.proxies.len());
        for proxy in &self.proxies {
            let proxy = proxy.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = proxy.run().await {
                    error!("proxy {} stopped serving: {e}", proxy.name());
                }
            }));
        }

        shutdown.await;
        info!("Shutting down faultline...");

        for middleware in &self.middlewares {
            middleware.teardown();
        }
        for task in tasks {
            task.abort();
        }

        Ok(())
    }
}
