//! Integration tests for faultline
//!
//! End-to-end tests for the protocol engines and the orchestrator, each
//! against a local mock backend:
//!
//! - `http_proxy`: HTTP engine with tamperer/delay/error symptoms
//! - `tcp_proxy`: TCP byte-pipe engine with the TCP tamperer
//! - `udp_proxy`: UDP NAT-table engine and session behaviour
//! - `orchestrator`: full YAML config boot and shutdown

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub mod http_proxy;
pub mod orchestrator;
pub mod tcp_proxy;
pub mod udp_proxy;

/// Reserve a port by briefly binding to it. Slightly racy by nature, but
/// good enough for loopback tests.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Spawn a backend HTTP server that answers every request with `body`.
pub async fn spawn_http_backend(body: &'static str) -> SocketAddr {
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::service::service_fn;
    use hyper_util::rt::{TokioExecutor, TokioIo};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((conn, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(move |_req| async move {
                    Ok::<_, std::convert::Infallible>(hyper::Response::new(Full::new(
                        Bytes::from(body),
                    )))
                });
                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(conn), service)
                    .await;
            });
        }
    });

    addr
}

/// Spawn a backend TCP server that echoes every byte it receives.
pub async fn spawn_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match conn.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if conn.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Connect to `addr`, retrying while the listener under test starts up.
pub async fn connect_with_retry(addr: &str) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("could not connect to {addr}");
}

/// Issue a bare HTTP/1.1 GET with `Connection: close` and return the whole
/// response text.
pub async fn raw_http_get(addr: &str, path: &str) -> String {
    let mut stream = connect_with_retry(addr).await;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
