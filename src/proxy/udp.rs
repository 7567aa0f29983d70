//! UDP proxy engine
//!
//! UDP is connectionless, so a single local socket serves many logical
//! clients. The engine keeps a NAT-style table keyed by client address:
//! each new client gets its own dialed upstream socket plus a dedicated
//! response-pump task that relays upstream datagrams back to the captured
//! client address. Middleware applies on both legs — `PreDispatch` mutates
//! the client→upstream payload, `PostDispatch` the upstream→client payload.
//!
//! Sessions are never evicted by default, matching the original design. An
//! opt-in `session_timeout` bounds the table for long-running deployments.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::apply_config;
use crate::error::{PluginError, ProxyError};
use crate::plugin::{dispatch, Exchange, MiddlewareChain, ProxyEvent};

use super::{default_host, default_packet_size, Proxy};

/// Configuration for [`UdpProxy`].
#[derive(Debug, Clone, Deserialize)]
pub struct UdpProxyConfig {
    /// Port to listen on.
    pub port: u16,

    /// Host/IP to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Upstream host to forward to.
    pub proxy_host: String,

    /// Upstream port to forward to.
    pub proxy_port: u16,

    /// Maximum datagram size handled per read.
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,

    /// Idle seconds before a client session is evicted. 0 disables
    /// eviction (sessions then live for the lifetime of the process).
    #[serde(default)]
    pub session_timeout: u64,
}

/// One tracked client: its address, its dedicated upstream socket, and the
/// response pump serving it.
struct UdpSession {
    client_addr: SocketAddr,
    upstream: Arc<UdpSocket>,
    last_activity: Mutex<Instant>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl UdpSession {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

type SessionTable = Arc<Mutex<HashMap<String, Arc<UdpSession>>>>;

/// NAT-table UDP proxy.
pub struct UdpProxy {
    config: UdpProxyConfig,
    middleware: MiddlewareChain,
    sessions: SessionTable,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
}

impl UdpProxy {
    pub fn new(config: UdpProxyConfig) -> Self {
        Self {
            config,
            middleware: Vec::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            sent: Arc::new(AtomicU64::new(0)),
            received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Proxy>, PluginError> {
        let config: UdpProxyConfig = apply_config(value)
            .map_err(|e| PluginError::invalid_config("udp_proxy", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }

    /// Number of live client sessions. Exposed for tests.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    async fn new_session(
        &self,
        upstream_addr: &str,
        client_addr: SocketAddr,
        local: &Arc<UdpSocket>,
    ) -> Option<Arc<UdpSession>> {
        let upstream = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("failed to bind upstream socket: {e}");
                return None;
            }
        };
        if let Err(e) = upstream.connect(upstream_addr).await {
            warn!("failed to dial upstream {upstream_addr}: {e}");
            return None;
        }

        let session = Arc::new(UdpSession {
            client_addr,
            upstream: Arc::new(upstream),
            last_activity: Mutex::new(Instant::now()),
            pump: Mutex::new(None),
        });

        // Dedicated response pump for this session's lifetime.
        let pump = tokio::spawn(wait_for_upstream(
            session.clone(),
            local.clone(),
            self.middleware.clone(),
            self.config.packet_size,
            self.sent.clone(),
        ));
        *session.pump.lock() = Some(pump);

        info!("created new session for client {client_addr}");
        Some(session)
    }
}

#[async_trait]
impl Proxy for UdpProxy {
    fn name(&self) -> &'static str {
        "udp_proxy"
    }

    fn setup(&mut self, chain: MiddlewareChain) -> Result<(), PluginError> {
        self.middleware = chain;
        Ok(())
    }

    async fn run(&self) -> Result<(), ProxyError> {
        let listen_addr = format!("{}:{}", self.config.host, self.config.port);
        let upstream_addr = format!("{}:{}", self.config.proxy_host, self.config.proxy_port);

        let local = Arc::new(
            UdpSocket::bind(&listen_addr)
                .await
                .map_err(|e| ProxyError::bind(&listen_addr, e.to_string()))?,
        );

        info!("UDP proxy listening on udp://{listen_addr} -> {upstream_addr}");

        if self.config.session_timeout > 0 {
            tokio::spawn(sweep_idle_sessions(
                self.sessions.clone(),
                Duration::from_secs(self.config.session_timeout),
            ));
        }

        let mut buf = vec![0u8; self.config.packet_size];

        loop {
            let (n, client_addr) = match local.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("error reading from client: {e}");
                    continue;
                }
            };
            self.received.fetch_add(n as u64, Ordering::Relaxed);
            trace!(%client_addr, len = n, "datagram received");

            // Single recv loop: only this task inserts, so lookup and
            // insert need not be atomic together.
            let key = client_addr.to_string();
            let existing = self.sessions.lock().get(&key).cloned();
            let session = match existing {
                Some(session) => {
                    debug!("found session for client {key}");
                    session
                }
                None => {
                    let Some(session) =
                        self.new_session(&upstream_addr, client_addr, &local).await
                    else {
                        continue;
                    };
                    self.sessions.lock().insert(key, session.clone());
                    session
                }
            };

            // Modify the incoming payload before forwarding to the target.
            let mut ctx = Exchange::for_bytes(buf[..n].to_vec());
            dispatch(&self.middleware, ProxyEvent::PreDispatch, &mut ctx).await;
            let out = ctx.bytes.unwrap_or_default();

            session.touch();
            if let Err(e) = session.upstream.send(&out).await {
                debug!("error relaying datagram upstream: {e}");
            }
        }
    }

    fn teardown(&self) {
        info!(
            "UDP proxy closed ({} bytes sent, {} bytes received)",
            self.sent.load(Ordering::Relaxed),
            self.received.load(Ordering::Relaxed)
        );
    }
}

/// Response pump: relay every upstream datagram back to the one client this
/// session serves, running the chain's `PostDispatch` on the way.
async fn wait_for_upstream(
    session: Arc<UdpSession>,
    local: Arc<UdpSocket>,
    middleware: MiddlewareChain,
    packet_size: usize,
    sent: Arc<AtomicU64>,
) {
    let mut buf = vec![0u8; packet_size];

    loop {
        trace!(client = %session.client_addr, "waiting for upstream response");
        let n = match session.upstream.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                debug!("error reading from upstream: {e}");
                continue;
            }
        };

        let mut ctx = Exchange::for_bytes(buf[..n].to_vec());
        dispatch(&middleware, ProxyEvent::PostDispatch, &mut ctx).await;
        let out = ctx.bytes.unwrap_or_default();

        session.touch();
        match local.send_to(&out, session.client_addr).await {
            Ok(written) => {
                sent.fetch_add(written as u64, Ordering::Relaxed);
                trace!(client = %session.client_addr, len = written, "relayed response to client");
            }
            Err(e) => debug!("error relaying to client {}: {e}", session.client_addr),
        }
    }
}

/// Evict sessions idle for longer than `timeout`, aborting their pumps.
async fn sweep_idle_sessions(sessions: SessionTable, timeout: Duration) {
    let interval = timeout.max(Duration::from_secs(2)) / 2;
    loop {
        tokio::time::sleep(interval).await;

        let expired: Vec<(String, Arc<UdpSession>)> = {
            let table = sessions.lock();
            table
                .iter()
                .filter(|(_, s)| s.idle_for() > timeout)
                .map(|(k, s)| (k.clone(), s.clone()))
                .collect()
        };

        for (key, session) in expired {
            sessions.lock().remove(&key);
            if let Some(pump) = session.pump.lock().take() {
                pump.abort();
            }
            debug!("evicted idle session {key}");
        }
    }
}
