//! Name-keyed plugin registry
//!
//! The registry maps configuration-declared plugin names to constructors.
//! Built-in plugins are registered during a defined bootstrap phase
//! ([`PluginRegistry::builtin`]) rather than through import-time side
//! effects, and the maps stay mutex-guarded even though the registry is
//! effectively read-only after startup.
//!
//! A constructor receives the plugin's raw YAML section and returns a
//! configured instance; decoding into the plugin's typed config struct (and
//! the required/default field contract that comes with it) happens inside
//! the constructor, so a bad section fails at load time, not deep inside
//! request handling.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::PluginError;
use crate::middleware::LoggerMiddleware;
use crate::proxy::{HttpProxy, Proxy, TcpProxy, UdpProxy};
use crate::symptom::{
    HttpDelaySymptom, HttpErrorSymptom, HttpTampererSymptom, NetworkShaperSymptom,
    TcpTampererSymptom,
};

use super::Middleware;

/// Constructor for a middleware/symptom plugin.
pub type MiddlewareConstructor =
    fn(&serde_yaml::Value) -> Result<Box<dyn Middleware>, PluginError>;

/// Constructor for a protocol proxy plugin.
pub type ProxyConstructor = fn(&serde_yaml::Value) -> Result<Box<dyn Proxy>, PluginError>;

/// Registry of plugin constructors, keyed by configuration name.
pub struct PluginRegistry {
    middlewares: Mutex<HashMap<String, MiddlewareConstructor>>,
    proxies: Mutex<HashMap<String, ProxyConstructor>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            middlewares: Mutex::new(HashMap::new()),
            proxies: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry with every built-in plugin registered.
    pub fn builtin() -> Self {
        let registry = Self::new();

        registry.register_middleware("logger", LoggerMiddleware::from_config);
        registry.register_middleware("http_delay", HttpDelaySymptom::from_config);
        registry.register_middleware("http_error", HttpErrorSymptom::from_config);
        registry.register_middleware("http_tamperer", HttpTampererSymptom::from_config);
        registry.register_middleware("tcp_tamperer", TcpTampererSymptom::from_config);
        registry.register_middleware("network_shape", NetworkShaperSymptom::from_config);

        registry.register_proxy("http_proxy", HttpProxy::from_config);
        registry.register_proxy("tcp_proxy", TcpProxy::from_config);
        registry.register_proxy("udp_proxy", UdpProxy::from_config);

        registry
    }

    /// Register a middleware constructor. Returns false if the name is taken.
    pub fn register_middleware(&self, name: &str, constructor: MiddlewareConstructor) -> bool {
        let mut map = self.middlewares.lock();
        if map.contains_key(name) {
            return false;
        }
        map.insert(name.to_string(), constructor);
        true
    }

    /// Register a proxy constructor. Returns false if the name is taken.
    pub fn register_proxy(&self, name: &str, constructor: ProxyConstructor) -> bool {
        let mut map = self.proxies.lock();
        if map.contains_key(name) {
            return false;
        }
        map.insert(name.to_string(), constructor);
        true
    }

    /// Look up a middleware constructor by name.
    pub fn lookup_middleware(&self, name: &str) -> Option<MiddlewareConstructor> {
        self.middlewares.lock().get(name).copied()
    }

    /// Look up a proxy constructor by name.
    pub fn lookup_proxy(&self, name: &str) -> Option<ProxyConstructor> {
        self.proxies.lock().get(name).copied()
    }

    /// Remove a middleware registration. Exists for test isolation.
    pub fn unregister_middleware(&self, name: &str) -> bool {
        self.middlewares.lock().remove(name).is_some()
    }

    /// Remove a proxy registration. Exists for test isolation.
    pub fn unregister_proxy(&self, name: &str) -> bool {
        self.proxies.lock().remove(name).is_some()
    }

    /// Names of all registered middleware plugins.
    pub fn middleware_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.middlewares.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all registered proxy plugins.
    pub fn proxy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.proxies.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
