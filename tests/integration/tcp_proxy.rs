//! TCP proxy engine integration tests

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use faultline::plugin::{Middleware, MiddlewareChain};
use faultline::proxy::{Proxy, TcpProxy, TcpProxyConfig};
use faultline::symptom::{TcpTamperConfig, TcpTampererConfig, TcpTampererSymptom};

use super::{connect_with_retry, free_port, spawn_tcp_echo};

fn proxy_config(port: u16, upstream: std::net::SocketAddr) -> TcpProxyConfig {
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

async fn start_proxy(config: TcpProxyConfig, chain: MiddlewareChain) {
    let mut proxy = TcpProxy::new(config);
    proxy.setup(chain).unwrap();
    let proxy = Arc::new(proxy);
    tokio::spawn(async move {
        let _ = proxy.run().await;
    });
}

#[tokio::test]
async fn test_byte_exact_passthrough() {
    let backend = spawn_tcp_echo().await;
    let port = free_port().await;

    start_proxy(proxy_config(port, backend), Vec::new()).await;

    let mut client = connect_with_retry(&format!("127.0.0.1:{port}")).await;
    client.write_all(b"ping").await.unwrap();

    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn test_tamperer_replaces_echoed_response() {
    let backend = spawn_tcp_echo().await;
    let port = free_port().await;

    let mut tamperer = TcpTampererSymptom::new(TcpTampererConfig {
        response: TcpTamperConfig {
            body: "new response body".into(),
            ..Default::default()
        },
        ..Default::default()
    });
    tamperer.setup().unwrap();

    start_proxy(proxy_config(port, backend), vec![Arc::new(tamperer)]).await;

    let mut client = connect_with_retry(&format!("127.0.0.1:{port}")).await;
    client.write_all(b"whatever the client sends").await.unwrap();

    let mut buf = vec![0u8; "new response body".len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, b"new response body");
}

#[tokio::test]
async fn test_request_tampering_reaches_upstream() {
    // Backend that captures what it receives and echoes a fixed marker.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();
    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let n = conn.read(&mut buf).await.unwrap();
        let _ = seen_tx.send(buf[..n].to_vec());
        let _ = conn.write_all(b"ok").await;
    });

    let port = free_port().await;
    let mut tamperer = TcpTampererSymptom::new(TcpTampererConfig {
        request: TcpTamperConfig {
            body: "new request body".into(),
            ..Default::default()
        },
        ..Default::default()
    });
    tamperer.setup().unwrap();

    start_proxy(proxy_config(port, backend), vec![Arc::new(tamperer)]).await;

    let mut client = connect_with_retry(&format!("127.0.0.1:{port}")).await;
    client.write_all(b"this is a message").await.unwrap();

    let seen = seen_rx.await.unwrap();
    assert_eq!(seen, b"new request body");

    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");
}

#[tokio::test]
async fn test_upstream_dial_failure_closes_client() {
    let port = free_port().await;
    let dead_upstream = free_port().await;

    let config = proxy_config(port, format!("127.0.0.1:{dead_upstream}").parse().unwrap());
    start_proxy(config, Vec::new()).await;

    let mut client = connect_with_retry(&format!("127.0.0.1:{port}")).await;
    // The proxy abandons the connection after the failed dial; the client
    // observes EOF rather than a hang.
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
}
