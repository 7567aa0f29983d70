//! TCP proxy engine
//!
//! Accepts inbound connections, dials the upstream target once per
//! connection, and pumps bytes in both directions through the middleware
//! chain: client→upstream reads fire `PreDispatch`, upstream→client reads
//! fire `PostDispatch`. Each pump reads at most `packet_size` bytes per
//! exchange, so symptoms see traffic in the same segment sizes the original
//! caller produced (up to the cap).
//!
//! Termination: the first pump to hit EOF or an I/O error signals a
//! capacity-1 channel; the connection task then tears both halves down and
//! logs final byte counts. A second signal from the other pump is swallowed
//! by `try_send`, never blocked on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::apply_config;
use crate::error::{PluginError, ProxyError};
use crate::plugin::{dispatch, Exchange, MiddlewareChain, ProxyEvent};

use super::{default_host, default_packet_size, Proxy};

/// Configuration for [`TcpProxy`].
#[derive(Debug, Clone, Deserialize)]
pub struct TcpProxyConfig {
    /// Port to listen on.
    pub port: u16,

    /// Host/IP to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Upstream host to forward to.
    pub proxy_host: String,

    /// Upstream port to forward to.
    pub proxy_port: u16,

    /// Disable Nagle's algorithm (TCP_NODELAY) on both legs.
    #[serde(default)]
    pub nagles_algorithm: bool,

    /// Accepted for config compatibility; payload rendering lives in the
    /// logger middleware's own `hex_output` switch.
    #[serde(default)]
    pub hex_output: bool,

    /// Maximum bytes read per pump iteration.
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
}

/// Bidirectional TCP byte-pipe proxy.
pub struct TcpProxy {
    config: TcpProxyConfig,
    middleware: MiddlewareChain,
    conn_id: AtomicU64,
}

impl TcpProxy {
    pub fn new(config: TcpProxyConfig) -> Self {
        Self {
            config,
            middleware: Vec::new(),
            conn_id: AtomicU64::new(0),
        }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Proxy>, PluginError> {
        let config: TcpProxyConfig = apply_config(value)
            .map_err(|e| PluginError::invalid_config("tcp_proxy", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }
}

#[async_trait]
impl Proxy for TcpProxy {
    fn name(&self) -> &'static str {
        "tcp_proxy"
    }

    fn setup(&mut self, chain: MiddlewareChain) -> Result<(), PluginError> {
        self.middleware = chain;
        Ok(())
    }

    async fn run(&self) -> Result<(), ProxyError> {
        let listen_addr = format!("{}:{}", self.config.host, self.config.port);
        let upstream_addr = format!("{}:{}", self.config.proxy_host, self.config.proxy_port);

        let listener = TcpListener::bind(&listen_addr)
            .await
            .map_err(|e| ProxyError::bind(&listen_addr, e.to_string()))?;

        info!("TCP proxy listening on tcp://{listen_addr} -> {upstream_addr}");

        loop {
            let (conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };

            let id = self.conn_id.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(conn = id, %peer, "accepted connection");

            let state = ConnectionState {
                id,
                upstream_addr: upstream_addr.clone(),
                nagles: self.config.nagles_algorithm,
                packet_size: self.config.packet_size,
                middleware: self.middleware.clone(),
            };
            tokio::spawn(handle_connection(conn, state));
        }
    }

    fn teardown(&self) {
        debug!("TCP proxy teardown");
    }
}

struct ConnectionState {
    id: u64,
    upstream_addr: String,
    nagles: bool,
    packet_size: usize,
    middleware: MiddlewareChain,
}

async fn handle_connection(client: TcpStream, state: ConnectionState) {
    // Dial the upstream synchronously for this connection; no retry — a
    // failed dial abandons the inbound connection.
    let upstream = match TcpStream::connect(&state.upstream_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                conn = state.id,
                "upstream connection to {} failed: {e}", state.upstream_addr
            );
            return;
        }
    };

    if state.nagles {
        let _ = client.set_nodelay(true);
        let _ = upstream.set_nodelay(true);
    }

    let client_addr = client
        .peer_addr()
        .map_or_else(|_| "unknown".into(), |a| a.to_string());
    info!(
        "Connection #{:03} opened {} >>> {}",
        state.id, client_addr, state.upstream_addr
    );

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));

    // Capacity 1: exactly one termination signal is consumed; the loser's
    // try_send is dropped instead of blocking forever.
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let outbound = tokio::spawn(pump(
        client_read,
        upstream_write,
        ProxyEvent::PreDispatch,
        state.middleware.clone(),
        state.packet_size,
        sent.clone(),
        done_tx.clone(),
    ));
    let inbound = tokio::spawn(pump(
        upstream_read,
        client_write,
        ProxyEvent::PostDispatch,
        state.middleware,
        state.packet_size,
        received.clone(),
        done_tx,
    ));

    let _ = done_rx.recv().await;
    outbound.abort();
    inbound.abort();

    info!(
        "Connection #{:03} closed ({} bytes sent, {} bytes received)",
        state.id,
        sent.load(Ordering::Relaxed),
        received.load(Ordering::Relaxed)
    );
}

/// Pump one direction: read a segment, run it through the chain, write the
/// (possibly mutated) bytes to the destination.
async fn pump<R, W>(
    mut src: R,
    mut dst: W,
    event: ProxyEvent,
    middleware: MiddlewareChain,
    packet_size: usize,
    counter: Arc<AtomicU64>,
    done: mpsc::Sender<()>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; packet_size];

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => {
                debug!(%event, "stream reached EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(%event, "read failed: {e}");
                break;
            }
        };

        let mut ctx = Exchange::for_bytes(buf[..n].to_vec());
        dispatch(&middleware, event, &mut ctx).await;
        let out = ctx.bytes.unwrap_or_default();

        if let Err(e) = dst.write_all(&out).await {
            error!(%event, "write failed: {e}");
            break;
        }
        counter.fetch_add(out.len() as u64, Ordering::Relaxed);
    }

    let _ = done.try_send(());
}
