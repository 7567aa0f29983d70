//! HTTP proxy engine integration tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use faultline::plugin::{Middleware, MiddlewareChain};
use faultline::proxy::{HttpProxy, HttpProxyConfig, Proxy};
use faultline::symptom::{
    HttpDelayConfig, HttpDelaySymptom, HttpErrorConfig, HttpErrorSymptom, HttpTampererConfig,
    HttpTampererSymptom, ResponseTamperConfig,
};

use super::{free_port, raw_http_get, spawn_http_backend};

fn proxy_config(port: u16, upstream: std::net::SocketAddr) -> HttpProxyConfig {
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

async fn start_proxy(config: HttpProxyConfig, chain: MiddlewareChain) {
    let mut proxy = HttpProxy::new(config);
    proxy.setup(chain).unwrap();
    let proxy = Arc::new(proxy);
    tokio::spawn(async move {
        let _ = proxy.run().await;
    });
}

fn setup_middleware(mut plugin: impl Middleware + 'static) -> Arc<dyn Middleware> {
    plugin.setup().unwrap();
    Arc::new(plugin)
}

#[tokio::test]
async fn test_plain_forwarding() {
    let backend = spawn_http_backend("proxied server up!").await;
    let port = free_port().await;

    start_proxy(proxy_config(port, backend), Vec::new()).await;

    let response = raw_http_get(&format!("127.0.0.1:{port}"), "/").await;
    assert!(response.contains("200 OK"), "got: {response}");
    assert!(response.contains("proxied server up!"), "got: {response}");
}

#[tokio::test]
async fn test_tamperer_rewrites_response_body() {
    let backend = spawn_http_backend("original body").await;
    let port = free_port().await;

    let tamperer = setup_middleware(HttpTampererSymptom::new(HttpTampererConfig {
        response: ResponseTamperConfig {
            body: "tampered body".into(),
            ..Default::default()
        },
        ..Default::default()
    }));

    start_proxy(proxy_config(port, backend), vec![tamperer]).await;

    let response = raw_http_get(&format!("127.0.0.1:{port}"), "/anything").await;
    assert!(response.contains("tampered body"), "got: {response}");
    assert!(!response.contains("original body"), "got: {response}");
}

#[tokio::test]
async fn test_delay_blocks_matching_exchange() {
    let backend = spawn_http_backend("slow but present").await;
    let port = free_port().await;

    let delay = setup_middleware(HttpDelaySymptom::new(HttpDelayConfig {
        request_delay: 200,
        ..Default::default()
    }));

    start_proxy(proxy_config(port, backend), vec![delay]).await;

    // Warm-up request so the measured one excludes listener startup.
    let _ = raw_http_get(&format!("127.0.0.1:{port}"), "/warmup").await;

    let start = Instant::now();
    let response = raw_http_get(&format!("127.0.0.1:{port}"), "/").await;
    assert!(response.contains("slow but present"));
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_http_error_short_circuits_upstream() {
    // Upstream that would answer 200 if reached.
    let backend = spawn_http_backend("should never be seen").await;
    let port = free_port().await;

    let error = setup_middleware(HttpErrorSymptom::new(HttpErrorConfig {
        status: 503,
        body: "injected outage".into(),
        delay: 0,
        matching_rules: Vec::new(),
    }));

    start_proxy(proxy_config(port, backend), vec![error]).await;

    let response = raw_http_get(&format!("127.0.0.1:{port}"), "/").await;
    assert!(response.contains("503"), "got: {response}");
    assert!(response.contains("injected outage"), "got: {response}");
    assert!(!response.contains("should never be seen"));
}

#[tokio::test]
async fn test_upstream_dial_failure_yields_502() {
    let port = free_port().await;
    // Point at a port nothing listens on.
    let dead_upstream = free_port().await;

    let config = proxy_config(port, format!("127.0.0.1:{dead_upstream}").parse().unwrap());
    start_proxy(config, Vec::new()).await;

    let response = raw_http_get(&format!("127.0.0.1:{port}"), "/").await;
    assert!(response.contains("502"), "got: {response}");
}
