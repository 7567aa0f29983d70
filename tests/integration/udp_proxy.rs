//! UDP proxy engine integration tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use faultline::plugin::{Middleware, MiddlewareChain};
use faultline::proxy::{Proxy, UdpProxy, UdpProxyConfig};
use faultline::symptom::{TcpTamperConfig, TcpTampererConfig, TcpTampererSymptom};

use super::free_port;

/// Spawn a backend UDP server that echoes every datagram.
async fn spawn_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let _ = socket.send_to(&buf[..n], peer).await;
        }
    });

    addr
}

fn proxy_config(port: u16, upstream: SocketAddr) -> UdpProxyConfig {
    let yaml = format!(
        r"
port: {port}
host: 127.0.0.1
proxy_host: {host}
proxy_port: {upstream_port}
",
        host = upstream.ip(),
        upstream_port = upstream.port()
    );
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    faultline::config::apply_config(&value).unwrap()
}

async fn start_proxy(config: UdpProxyConfig, chain: MiddlewareChain) -> Arc<UdpProxy> {
    let mut proxy = UdpProxy::new(config);
    proxy.setup(chain).unwrap();
    let proxy = Arc::new(proxy);
    let runner = proxy.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    // Give the listener a moment to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;
    proxy
}

async fn exchange_datagram(proxy_port: u16, payload: &[u8]) -> (UdpSocket, Vec<u8>) {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(payload, format!("127.0.0.1:{proxy_port}"))
        .await
        .unwrap();

    let mut buf = [0u8; 4096];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .expect("timed out waiting for relayed datagram")
        .unwrap();
    (client, buf[..n].to_vec())
}

#[tokio::test]
async fn test_datagram_relayed_both_ways() {
    let backend = spawn_udp_echo().await;
    let port = free_port().await;

    start_proxy(proxy_config(port, backend), Vec::new()).await;

    let (_client, response) = exchange_datagram(port, b"ping").await;
    assert_eq!(response, b"ping");
}

#[tokio::test]
async fn test_response_tampering_applies_post_dispatch() {
    let backend = spawn_udp_echo().await;
    let port = free_port().await;

    let mut tamperer = TcpTampererSymptom::new(TcpTampererConfig {
        response: TcpTamperConfig {
            body: "mutated reply".into(),
            ..Default::default()
        },
        ..Default::default()
    });
    tamperer.setup().unwrap();

    start_proxy(proxy_config(port, backend), vec![Arc::new(tamperer)]).await;

    let (_client, response) = exchange_datagram(port, b"ping").await;
    assert_eq!(response, b"mutated reply");
}

#[tokio::test]
async fn test_same_client_reuses_one_session() {
    let backend = spawn_udp_echo().await;
    let port = free_port().await;

    let proxy = start_proxy(proxy_config(port, backend), Vec::new()).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut buf = [0u8; 64];
    for _ in 0..3 {
        client
            .send_to(b"ping", format!("127.0.0.1:{port}"))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
    }

    assert_eq!(proxy.session_count(), 1);

    // A different client address creates a second session.
    let other = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    other
        .send_to(b"ping", format!("127.0.0.1:{port}"))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), other.recv_from(&mut buf))
        .await
        .expect("timed out")
        .unwrap();

    assert_eq!(proxy.session_count(), 2);
}

#[tokio::test]
async fn test_idle_sessions_evicted_when_timeout_set() {
    let backend = spawn_udp_echo().await;
    let port = free_port().await;

    let mut config = proxy_config(port, backend);
    config.session_timeout = 1;

    let proxy = start_proxy(config, Vec::new()).await;

    let (_client, _) = exchange_datagram(port, b"ping").await;
    assert_eq!(proxy.session_count(), 1);

    // Sweeper runs every timeout/2 (clamped); idle session must be gone
    // well within a few periods.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(proxy.session_count(), 0);
}
