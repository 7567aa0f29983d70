//! Network Shaper collaborator interface
//!
//! OS-level bandwidth/latency/packet-loss shaping is platform-specific
//! (tc/netem, ipfw, pfctl) and lives outside this crate. The symptom layer
//! talks to it through [`NetworkShaper`]: a declarative [`ShapingSpec`] is
//! applied at setup and reverted at teardown by re-submitting the same spec
//! with `stop` set.

use parking_lot::Mutex;
use tracing::info;

use crate::error::PluginError;

/// Declarative description of the shaping to apply (or revert).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapingSpec {
    /// Network device to shape (e.g. `eth0`); empty lets the backend pick.
    pub device: String,
    /// Added latency in milliseconds; 0 = none.
    pub latency: i64,
    /// Bandwidth limit for matched traffic, in kbit/s; 0 = unlimited.
    pub target_bandwidth: i64,
    /// Bandwidth limit for all other traffic, in kbit/s; 0 = unlimited.
    pub default_bandwidth: i64,
    /// Packet loss percentage, 0-100.
    pub packet_loss: f64,
    /// IPv4 addresses/CIDR blocks the shaping targets.
    pub target_ipv4: Vec<String>,
    /// IPv6 addresses/CIDR blocks the shaping targets.
    pub target_ipv6: Vec<String>,
    /// Ports or `low:high` ranges the shaping targets.
    pub target_ports: Vec<String>,
    /// Protocols the shaping targets (tcp, udp, icmp).
    pub target_protos: Vec<String>,
    /// When true, revert previously-applied shaping instead of applying.
    pub stop: bool,
}

/// External collaborator that turns a [`ShapingSpec`] into platform rules.
pub trait NetworkShaper: Send + Sync {
    /// Apply (or, with `spec.stop`, revert) the described shaping.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the backend cannot apply the rules.
    fn apply(&self, spec: &ShapingSpec) -> Result<(), PluginError>;
}

/// Default shaper: logs what would be applied and succeeds.
///
/// Real deployments substitute a platform backend; keeping the default
/// inert means a config that names `network_shape` still boots everywhere.
#[derive(Debug, Default)]
pub struct LoggingShaper;

impl NetworkShaper for LoggingShaper {
    fn apply(&self, spec: &ShapingSpec) -> Result<(), PluginError> {
        if spec.stop {
            info!(device = %spec.device, "network shaping reverted");
        } else {
            info!(
                device = %spec.device,
                latency_ms = spec.latency,
                target_bw = spec.target_bandwidth,
                packet_loss = spec.packet_loss,
                ports = ?spec.target_ports,
                protos = ?spec.target_protos,
                "network shaping applied"
            );
        }
        Ok(())
    }
}

/// Shaper that records every invocation; a test double.
#[derive(Debug, Default)]
pub struct RecordingShaper {
    invocations: Mutex<Vec<ShapingSpec>>,
}

impl RecordingShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All specs applied so far, in order.
    pub fn invocations(&self) -> Vec<ShapingSpec> {
        self.invocations.lock().clone()
    }
}

impl NetworkShaper for RecordingShaper {
    fn apply(&self, spec: &ShapingSpec) -> Result<(), PluginError> {
        self.invocations.lock().push(spec.clone());
        Ok(())
    }
}
