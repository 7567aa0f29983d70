//! Network shaper symptom
//!
//! Degrades the network itself rather than individual exchanges: bandwidth
//! caps, added latency and packet loss, applied through the external
//! [`NetworkShaper`] collaborator. Shaping goes on at `setup` and comes off
//! at `teardown`; `handle_event` is a no-op because the OS does the mucking.
//!
//! Target validation is strict and fatal: a malformed port range or CIDR
//! must abort startup rather than silently shape a partial ruleset.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::apply_config;
use crate::error::PluginError;
use crate::plugin::{Exchange, Middleware, ProxyEvent};
use crate::shaper::{LoggingShaper, NetworkShaper, ShapingSpec};

const PLUGIN: &str = "network_shape";

/// Configuration for [`NetworkShaperSymptom`].
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkShapeConfig {
    /// Device to shape (e.g. `eth0`).
    #[serde(default)]
    pub device: String,

    /// Added latency in milliseconds.
    #[serde(default)]
    pub latency: i64,

    /// Bandwidth limit for matched traffic, kbit/s.
    #[serde(default)]
    pub target_bw: i64,

    /// Bandwidth limit for everything else, kbit/s.
    #[serde(default)]
    pub default_bw: i64,

    /// Packet loss percentage.
    #[serde(default)]
    pub packet_loss: f64,

    /// Target addresses: IPv4/IPv6 literals or CIDR blocks.
    #[serde(default)]
    pub target_ips: Vec<String>,

    /// Additional target addresses (kept separate for config compatibility;
    /// classification is by actual address family, not by which list an
    /// entry came from).
    #[serde(default)]
    pub target_ips6: Vec<String>,

    /// Target ports: single ports or `low:high` ranges.
    #[serde(default)]
    pub target_ports: Vec<String>,

    /// Target protocols, each one of tcp/udp/icmp.
    #[serde(default = "default_protos")]
    pub target_protos: Vec<String>,
}

fn default_protos() -> Vec<String> {
    vec!["tcp".into(), "icmp".into()]
}

impl Default for NetworkShapeConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            latency: 0,
            target_bw: 0,
            default_bw: 0,
            packet_loss: 0.0,
            target_ips: Vec::new(),
            target_ips6: Vec::new(),
            target_ports: Vec::new(),
            target_protos: default_protos(),
        }
    }
}

/// Shapes the host network for the lifetime of the process.
pub struct NetworkShaperSymptom {
    config: NetworkShapeConfig,
    shaper: Arc<dyn NetworkShaper>,
    spec: Option<ShapingSpec>,
}

impl NetworkShaperSymptom {
    pub fn new(config: NetworkShapeConfig) -> Self {
        Self::with_shaper(config, Arc::new(LoggingShaper))
    }

    /// Construct with an injected shaper backend.
    pub fn with_shaper(config: NetworkShapeConfig, shaper: Arc<dyn NetworkShaper>) -> Self {
        Self {
            config,
            shaper,
            spec: None,
        }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Middleware>, PluginError> {
        let config: NetworkShapeConfig =
            apply_config(value).map_err(|e| PluginError::invalid_config(PLUGIN, e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }

    /// The shaping spec built at setup. Exposed for tests.
    pub fn spec(&self) -> Option<&ShapingSpec> {
        self.spec.as_ref()
    }

    fn build_spec(&self) -> Result<ShapingSpec, PluginError> {
        let (target_ipv4, target_ipv6) =
            classify_addresses(self.config.target_ips.iter().chain(&self.config.target_ips6))?;

        Ok(ShapingSpec {
            device: self.config.device.clone(),
            latency: self.config.latency,
            target_bandwidth: self.config.target_bw,
            default_bandwidth: self.config.default_bw,
            packet_loss: self.config.packet_loss,
            target_ipv4,
            target_ipv6,
            target_ports: validate_ports(&self.config.target_ports)?,
            target_protos: validate_protos(&self.config.target_protos)?,
            stop: false,
        })
    }
}

/// Validate port entries: a single port or a `low:high` range, both bounds
/// in 1..=65535 with `low < high`.
fn validate_ports(entries: &[String]) -> Result<Vec<String>, PluginError> {
    for entry in entries {
        match entry.split_once(':') {
            Some((low, high)) => {
                let low = parse_port(low, entry)?;
                let high = parse_port(high, entry)?;
                if low >= high {
                    return Err(PluginError::setup(
                        PLUGIN,
                        format!("invalid port range '{entry}': lower bound must be below upper"),
                    ));
                }
            }
            None => {
                parse_port(entry, entry)?;
            }
        }
    }
    Ok(entries.to_vec())
}

fn parse_port(value: &str, entry: &str) -> Result<u16, PluginError> {
    let port: u16 = value
        .parse()
        .map_err(|_| PluginError::setup(PLUGIN, format!("invalid port entry '{entry}'")))?;
    if port == 0 {
        return Err(PluginError::setup(
            PLUGIN,
            format!("invalid port entry '{entry}': ports are 1-65535"),
        ));
    }
    Ok(port)
}

/// Parse address entries (literal IPs or CIDR blocks) and classify them
/// into separate v4/v6 lists by actual address family.
fn classify_addresses<'a>(
    entries: impl Iterator<Item = &'a String>,
) -> Result<(Vec<String>, Vec<String>), PluginError> {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for entry in entries {
        if let Ok(net) = entry.parse::<IpNet>() {
            match net {
                IpNet::V4(_) => v4.push(entry.clone()),
                IpNet::V6(_) => v6.push(entry.clone()),
            }
        } else if let Ok(addr) = entry.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(_) => v4.push(entry.clone()),
                IpAddr::V6(_) => v6.push(entry.clone()),
            }
        } else {
            return Err(PluginError::setup(
                PLUGIN,
                format!("invalid target address '{entry}': expected IP or CIDR"),
            ));
        }
    }

    Ok((v4, v6))
}

/// Restrict protocols to the fixed tcp/udp/icmp enumeration.
fn validate_protos(entries: &[String]) -> Result<Vec<String>, PluginError> {
    for proto in entries {
        if !matches!(proto.as_str(), "tcp" | "udp" | "icmp") {
            return Err(PluginError::setup(
                PLUGIN,
                format!("unsupported protocol '{proto}': expected tcp, udp or icmp"),
            ));
        }
    }
    Ok(entries.to_vec())
}

#[async_trait]
impl Middleware for NetworkShaperSymptom {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        debug!("network shaper setup: enabling shaping");
        let spec = self.build_spec()?;

        // Applying is fail-open: the external backend misbehaving must not
        // take the proxy down, unlike the config validation above.
        if let Err(e) = self.shaper.apply(&spec) {
            error!("network shaping could not be applied: {e}");
        }
        self.spec = Some(spec);
        Ok(())
    }

    async fn handle_event(&self, _event: ProxyEvent, _ctx: &mut Exchange) {
        // Shaping happens at the OS level; nothing to do per exchange.
    }

    fn teardown(&self) {
        debug!("network shaper teardown: reverting shaping");
        if let Some(spec) = &self.spec {
            let mut spec = spec.clone();
            spec.stop = true;
            if let Err(e) = self.shaper.apply(&spec) {
                error!("network shaping could not be reverted: {e}");
            }
        }
    }
}
