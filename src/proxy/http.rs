//! HTTP reverse-proxy engine
//!
//! Per inbound request: **Receive → PreDispatch chain → MatchRoutingRule →
//! RewriteAndForward → PostDispatch chain → WriteClientResponse**. The
//! request is buffered into an [`Exchange`], so symptoms mutate complete
//! requests and responses; a symptom that installs a response during
//! `PreDispatch` (e.g. `http_error`) short-circuits the upstream leg.
//!
//! Routing rules pair a request matcher with a pass-through transform and
//! are evaluated in declared order, first match wins. A catch-all rule
//! targeting the configured upstream is appended at setup if not already
//! present, so every request proxies somewhere.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::apply_config;
use crate::error::{PluginError, ProxyError};
use crate::plugin::{
    dispatch, Exchange, HttpExchangeRequest, HttpExchangeResponse, MiddlewareChain, ProxyEvent,
};
use crate::rules::{CompiledRule, MatchingRule};
use crate::tls::{
    build_server_config, CertificateProvider, ClientTlsOptions, DefaultCertificateProvider,
};

use super::{default_host, Proxy};

/// Request matcher half of a proxy rule. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProxyRuleMatch {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub host: String,
}

/// Pass-through transform half of a proxy rule. Empty fields fall back to
/// the proxy's configured upstream target.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyRulePass {
    /// Override the forwarded method.
    #[serde(default)]
    pub method: String,
    /// Prefix prepended to the original request path.
    #[serde(default)]
    pub path: String,
    /// Override the upstream scheme.
    #[serde(default)]
    pub scheme: String,
    /// Override the upstream authority (`host:port`).
    #[serde(default)]
    pub host: String,
}

/// A routing rule: requests matching `request` forward according to `pass`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyRule {
    #[serde(default)]
    pub request: ProxyRuleMatch,
    #[serde(default)]
    pub pass: ProxyRulePass,
}

impl ProxyRuleMatch {
    fn catch_all() -> Self {
        Self {
            method: ".*".into(),
            path: "/".into(),
            host: ".*".into(),
        }
    }

    fn to_matching_rule(&self) -> MatchingRule {
        MatchingRule {
            method: self.method.clone(),
            path: self.path.clone(),
            host: self.host.clone(),
            probability: 0.0,
        }
    }
}

/// Configuration for [`HttpProxy`].
#[derive(Debug, Clone, Deserialize)]
pub struct HttpProxyConfig {
    /// Port to listen on.
    pub port: u16,

    /// Host/IP to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Inbound protocol: `http` or `https`.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Upstream host to forward to.
    pub proxy_host: String,

    /// Upstream port to forward to.
    pub proxy_port: u16,

    /// Upstream protocol: `http` or `https`.
    #[serde(default = "default_protocol")]
    pub proxy_protocol: String,

    /// Skip verification of the upstream certificate.
    #[serde(default)]
    pub insecure: bool,

    /// PEM certificate presented to inbound clients (required for https).
    #[serde(default)]
    pub proxy_ssl_cert: Option<String>,

    /// PEM key for `proxy_ssl_cert` (required for https).
    #[serde(default)]
    pub proxy_ssl_key: Option<String>,

    /// Client certificate for mutual TLS on the upstream leg.
    #[serde(default)]
    pub proxy_client_ssl_cert: Option<String>,

    /// Client key for mutual TLS on the upstream leg.
    #[serde(default)]
    pub proxy_client_ssl_key: Option<String>,

    /// CA bundle verifying the upstream in mutual-TLS mode.
    #[serde(default)]
    pub proxy_client_ssl_ca: Option<String>,

    /// Ordered routing rules; first match wins.
    #[serde(default)]
    pub proxy_rules: Vec<ProxyRule>,
}

fn default_protocol() -> String {
    "http".into()
}

struct CompiledProxyRule {
    matcher: CompiledRule,
    pass: ProxyRulePass,
}

/// HTTP reverse proxy with pluggable routing rules and TLS on either leg.
pub struct HttpProxy {
    config: HttpProxyConfig,
    middleware: MiddlewareChain,
    rules: Vec<CompiledProxyRule>,
    provider: Arc<dyn CertificateProvider>,
    client_tls: Option<rustls::ClientConfig>,
    server_tls: Option<rustls::ServerConfig>,
}

impl HttpProxy {
    pub fn new(config: HttpProxyConfig) -> Self {
        Self::with_provider(config, Arc::new(DefaultCertificateProvider))
    }

    /// Construct with an injected certificate provider.
    pub fn with_provider(config: HttpProxyConfig, provider: Arc<dyn CertificateProvider>) -> Self {
        Self {
            config,
            middleware: Vec::new(),
            rules: Vec::new(),
            provider,
            client_tls: None,
            server_tls: None,
        }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Proxy>, PluginError> {
        let config: HttpProxyConfig = apply_config(value)
            .map_err(|e| PluginError::invalid_config("http_proxy", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }

    /// Number of compiled routing rules. Exposed for tests.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn proxy_authority(&self) -> String {
        format!("{}:{}", self.config.proxy_host, self.config.proxy_port)
    }
}

#[async_trait]
impl Proxy for HttpProxy {
    fn name(&self) -> &'static str {
        "http_proxy"
    }

    fn setup(&mut self, chain: MiddlewareChain) -> Result<(), PluginError> {
        self.middleware = chain;

        // Catch-all appended even alongside explicit rules, unless the
        // config already declares one.
        let mut declared = self.config.proxy_rules.clone();
        if !declared
            .iter()
            .any(|r| r.request == ProxyRuleMatch::catch_all())
        {
            declared.push(ProxyRule {
                request: ProxyRuleMatch::catch_all(),
                pass: ProxyRulePass::default(),
            });
        }

        self.rules = declared
            .into_iter()
            .map(|rule| {
                Ok(CompiledProxyRule {
                    matcher: rule.request.to_matching_rule().compile(self.name())?,
                    pass: rule.pass,
                })
            })
            .collect::<Result<_, PluginError>>()?;

        // TLS material is loaded here so bad paths fail startup, not the
        // first request.
        self.client_tls = Some(
            self.provider
                .client_config(&ClientTlsOptions {
                    insecure: self.config.insecure,
                    client_cert: self.config.proxy_client_ssl_cert.clone(),
                    client_key: self.config.proxy_client_ssl_key.clone(),
                    client_ca: self.config.proxy_client_ssl_ca.clone(),
                })
                .map_err(|e| PluginError::setup(self.name(), e.to_string()))?,
        );

        if self.config.protocol == "https" {
            let (Some(cert), Some(key)) = (
                self.config.proxy_ssl_cert.as_deref(),
                self.config.proxy_ssl_key.as_deref(),
            ) else {
                return Err(PluginError::setup(
                    self.name(),
                    "protocol https requires proxy_ssl_cert and proxy_ssl_key",
                ));
            };
            self.server_tls = Some(
                build_server_config(cert, key)
                    .map_err(|e| PluginError::setup(self.name(), e.to_string()))?,
            );
        }

        Ok(())
    }

    async fn run(&self) -> Result<(), ProxyError> {
        let listen_addr = format!("{}:{}", self.config.host, self.config.port);

        let listener = TcpListener::bind(&listen_addr)
            .await
            .map_err(|e| ProxyError::bind(&listen_addr, e.to_string()))?;

        info!(
            "HTTP proxy listening on {}://{} -> {}://{}",
            self.config.protocol,
            listen_addr,
            self.config.proxy_protocol,
            self.proxy_authority()
        );

        let client_tls = self
            .client_tls
            .clone()
            .ok_or_else(|| ProxyError::Http("proxy started before setup".into()))?;
        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(client_tls)
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let acceptor = self
            .server_tls
            .clone()
            .map(|config| TlsAcceptor::from(Arc::new(config)));

        let state = Arc::new(EngineState {
            middleware: self.middleware.clone(),
            rules: self
                .rules
                .iter()
                .map(|r| CompiledProxyRule {
                    matcher: r.matcher.clone(),
                    pass: r.pass.clone(),
                })
                .collect(),
            client,
            scheme: self.config.protocol.clone(),
            proxy_protocol: self.config.proxy_protocol.clone(),
            proxy_authority: self.proxy_authority(),
        });

        loop {
            let (conn, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };
            debug!(%peer, "accepted HTTP connection");

            let state = state.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move { handle_request(state, req).await }
                });

                let served = match acceptor {
                    Some(acceptor) => match acceptor.accept(conn).await {
                        Ok(tls) => {
                            auto::Builder::new(TokioExecutor::new())
                                .serve_connection(TokioIo::new(tls), service)
                                .await
                        }
                        Err(e) => {
                            debug!(%peer, "TLS handshake failed: {e}");
                            return;
                        }
                    },
                    None => {
                        auto::Builder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(conn), service)
                            .await
                    }
                };

                if let Err(e) = served {
                    debug!(%peer, "connection ended with error: {e}");
                }
            });
        }
    }

    fn teardown(&self) {
        debug!("HTTP proxy teardown");
    }
}

type UpstreamClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

struct EngineState {
    middleware: MiddlewareChain,
    rules: Vec<CompiledProxyRule>,
    client: UpstreamClient,
    scheme: String,
    proxy_protocol: String,
    proxy_authority: String,
}

async fn handle_request(
    state: Arc<EngineState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let request = match buffer_request(&state.scheme, req).await {
        Ok(request) => request,
        Err(e) => {
            warn!("failed to buffer inbound request: {e}");
            return Ok(error_response(StatusCode::BAD_GATEWAY, "unreadable request"));
        }
    };

    let mut ctx = Exchange::for_http(request);
    dispatch(&state.middleware, ProxyEvent::PreDispatch, &mut ctx).await;

    // A response installed pre-dispatch short-circuits the upstream leg.
    if ctx.response.is_none() {
        forward_upstream(&state, &mut ctx).await;
    }

    dispatch(&state.middleware, ProxyEvent::PostDispatch, &mut ctx).await;

    let response = ctx.response.take().unwrap_or_else(|| {
        HttpExchangeResponse::new(StatusCode::BAD_GATEWAY, b"no upstream response".to_vec())
    });
    Ok(render_response(response))
}

/// Buffer the inbound hyper request into the pipeline's structured form.
async fn buffer_request(
    scheme: &str,
    req: Request<Incoming>,
) -> Result<HttpExchangeRequest, hyper::Error> {
    let (parts, body) = req.into_parts();

    let host = parts
        .headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.host().map(str::to_string))
        .unwrap_or_default();

    let body = body.collect().await?.to_bytes().to_vec();

    Ok(HttpExchangeRequest {
        method: parts.method,
        scheme: scheme.to_string(),
        host,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
    })
}

/// First-match rule selection over the in-flight exchange.
fn select_pass<'a>(rules: &'a [CompiledProxyRule], ctx: &Exchange) -> Option<&'a ProxyRulePass> {
    rules
        .iter()
        .find(|rule| rule.matcher.matches(ctx))
        .map(|rule| &rule.pass)
}

/// Build the forwarded method and URI from the matched pass-through
/// transform: path prefix concatenation, scheme/host fallbacks to the
/// configured upstream, method override applied when present.
fn director(
    pass: &ProxyRulePass,
    proxy_protocol: &str,
    proxy_authority: &str,
    request: &HttpExchangeRequest,
) -> Result<(Method, Uri), http::uri::InvalidUri> {
    let scheme = if pass.scheme.is_empty() {
        proxy_protocol
    } else {
        pass.scheme.as_str()
    };
    let authority = if pass.host.is_empty() {
        proxy_authority
    } else {
        pass.host.as_str()
    };
    let path = if pass.path.is_empty() {
        request.path.clone()
    } else {
        format!("{}{}", pass.path, request.path)
    };

    let uri = match &request.query {
        Some(query) => format!("{scheme}://{authority}{path}?{query}"),
        None => format!("{scheme}://{authority}{path}"),
    }
    .parse::<Uri>()?;

    let method = if pass.method.is_empty() {
        request.method.clone()
    } else {
        pass.method
            .to_uppercase()
            .parse::<Method>()
            .unwrap_or_else(|_| request.method.clone())
    };

    Ok((method, uri))
}

/// Forward the exchange upstream, filling `ctx.response`. Failures become a
/// 502 on this exchange only.
async fn forward_upstream(state: &EngineState, ctx: &mut Exchange) {
    let Some(pass) = select_pass(&state.rules, ctx) else {
        warn!("no routing rule matched; returning 502");
        ctx.response = Some(HttpExchangeResponse::new(
            StatusCode::BAD_GATEWAY,
            b"no routing rule matched".to_vec(),
        ));
        return;
    };

    let Some(request) = ctx.request.as_ref() else {
        ctx.response = Some(HttpExchangeResponse::new(
            StatusCode::BAD_GATEWAY,
            b"missing request context".to_vec(),
        ));
        return;
    };

    let (method, uri) =
        match director(pass, &state.proxy_protocol, &state.proxy_authority, request) {
            Ok(directed) => directed,
            Err(e) => {
                warn!("director produced invalid upstream URI: {e}");
                ctx.response = Some(HttpExchangeResponse::new(
                    StatusCode::BAD_GATEWAY,
                    b"invalid upstream target".to_vec(),
                ));
                return;
            }
        };

    debug!(%method, %uri, "forwarding upstream");

    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(headers) = builder.headers_mut() {
        copy_message_headers(&request.headers, headers);
        // The original Host header travels upstream even though the target
        // authority comes from the routing rule.
        if !request.host.is_empty() {
            if let Ok(value) = request.host.parse() {
                headers.insert(HOST, value);
            }
        }
    }

    let outbound = match builder.body(Full::new(Bytes::from(request.body.clone()))) {
        Ok(outbound) => outbound,
        Err(e) => {
            warn!("failed to build upstream request: {e}");
            ctx.response = Some(HttpExchangeResponse::new(
                StatusCode::BAD_GATEWAY,
                b"invalid upstream request".to_vec(),
            ));
            return;
        }
    };

    match state.client.request(outbound).await {
        Ok(upstream_response) => {
            let (parts, body) = upstream_response.into_parts();
            match body.collect().await {
                Ok(collected) => {
                    let mut headers = HeaderMap::new();
                    copy_message_headers(&parts.headers, &mut headers);
                    ctx.response = Some(HttpExchangeResponse {
                        status: parts.status,
                        headers,
                        body: collected.to_bytes().to_vec(),
                    });
                }
                Err(e) => {
                    warn!("failed to buffer upstream response: {e}");
                    ctx.response = Some(HttpExchangeResponse::new(
                        StatusCode::BAD_GATEWAY,
                        b"unreadable upstream response".to_vec(),
                    ));
                }
            }
        }
        Err(e) => {
            warn!("upstream request failed: {e}");
            ctx.response = Some(HttpExchangeResponse::new(
                StatusCode::BAD_GATEWAY,
                format!("upstream request failed: {e}").into_bytes(),
            ));
        }
    }
}

/// Copy headers between buffered messages, dropping framing headers that
/// are recomputed for the re-serialized body.
fn copy_message_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if name == HOST || name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn render_response(response: HttpExchangeResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        copy_message_headers(&response.headers, headers);
    }
    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|_| error_response(StatusCode::BAD_GATEWAY, "unrenderable response"))
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.as_bytes().to_vec())));
    *response.status_mut() = status;
    response
}
