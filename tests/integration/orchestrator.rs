//! Orchestrator integration tests: full YAML config to served traffic

use std::time::Duration;

use faultline::config::load_config_str;
use faultline::orchestrator::Faultline;
use faultline::plugin::PluginRegistry;

use super::{free_port, raw_http_get, spawn_http_backend};

#[tokio::test]
async fn test_yaml_config_boots_and_serves() {
    let backend = spawn_http_backend("proxied server up!").await;
    let port = free_port().await;

    let yaml = format!(
        r#"
name: end to end rig
loglevel: 3
middleware:
  - name: logger
  - name: http_tamperer
    config:
      response:
        headers:
          x_chaos: "injected"
proxy:
  - name: http_proxy
    config:
      port: {port}
      host: 127.0.0.1
      proxy_host: {host}
      proxy_port: {upstream_port}
"#,
        host = backend.ip(),
        upstream_port = backend.port()
    );

    let config = load_config_str(&yaml).unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let runner = tokio::spawn(async move {
        Faultline::new(config)
            .run(&PluginRegistry::builtin(), async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let response = raw_http_get(&format!("127.0.0.1:{port}"), "/").await;
    assert!(response.contains("200 OK"), "got: {response}");
    assert!(response.contains("proxied server up!"), "got: {response}");
    assert!(response.contains("x-chaos: injected"), "got: {response}");

    shutdown_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("orchestrator did not shut down")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unknown_proxy_name_fails_startup() {
    let yaml = r"
proxy:
  - name: websocket_proxy
    config:
      port: 1
";
    let config = load_config_str(yaml).unwrap();

    let result = Faultline::new(config)
        .run(&PluginRegistry::builtin(), std::future::ready(()))
        .await;
    assert!(result.is_err());
}
