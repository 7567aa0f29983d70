//! HTTP tamperer symptom
//!
//! Rewrites matching HTTP requests before they are forwarded upstream and
//! responses before they are returned to the caller. Mutations apply in a
//! fixed order on each leg:
//!
//! - request: path, host, body, cookies, headers, method (last)
//! - response: body, cookies, headers, status (last)
//!
//! Replacing a request body builds a fresh request around the new body —
//! method and URL survive, previously-set headers do not. Replacing a
//! response body preserves all other response metadata. Both behaviours are
//! inherited contract.

use std::time::SystemTime;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use http::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::apply_config;
use crate::error::PluginError;
use crate::plugin::{Exchange, Middleware, ProxyEvent};
use crate::rules::{any_match, compile_rules, expand_default, CompiledRule, MatchingRule};

/// A cookie to inject, with its expiry still in raw string form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub domain: String,
    /// Expiry timestamp; RFC 1123 or the legacy `Mon, 02-Jan-2006 15:04:05
    /// MST` shape. Unparseable values drop the Expires attribute entirely.
    #[serde(default)]
    pub expires: String,
    #[serde(default)]
    pub max_age: i64,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl CookieConfig {
    /// Serialize in Set-Cookie form: `name=value` plus whichever attributes
    /// are present.
    pub fn header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if !self.path.is_empty() {
            out.push_str("; Path=");
            out.push_str(&self.path);
        }
        if !self.domain.is_empty() {
            out.push_str("; Domain=");
            out.push_str(&self.domain);
        }
        if let Some(expires) = parse_expiry(&self.expires) {
            out.push_str("; Expires=");
            out.push_str(&httpdate::fmt_http_date(expires));
        }
        if self.max_age > 0 {
            out.push_str(&format!("; Max-Age={}", self.max_age));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out
    }
}

/// Parse a cookie expiry string: RFC 1123 first, then the legacy
/// dash-separated format with its zone token stripped.
fn parse_expiry(raw: &str) -> Option<SystemTime> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = httpdate::parse_http_date(raw) {
        return Some(t);
    }
    let without_zone = raw.rsplit_once(' ').map_or(raw, |(head, _)| head);
    chrono::NaiveDateTime::parse_from_str(without_zone, "%a, %d-%b-%Y %H:%M:%S")
        .ok()
        .map(|dt| SystemTime::from(dt.and_utc()))
}

/// Request-side mutations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestTamperConfig {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: Vec<CookieConfig>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub host: String,
}

/// Response-side mutations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseTamperConfig {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: Vec<CookieConfig>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub status: u16,
}

/// Configuration for [`HttpTampererSymptom`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpTampererConfig {
    #[serde(default)]
    pub request: RequestTamperConfig,
    #[serde(default)]
    pub response: ResponseTamperConfig,
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}

/// Messes with requests and responses between a consumer and provider.
pub struct HttpTampererSymptom {
    config: HttpTampererConfig,
    rules: Vec<CompiledRule>,
}

impl HttpTampererSymptom {
    pub fn new(config: HttpTampererConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
        }
    }

    /// Registry constructor.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the raw section fails to decode.
    pub fn from_config(value: &serde_yaml::Value) -> Result<Box<dyn Middleware>, PluginError> {
        let config: HttpTampererConfig = apply_config(value)
            .map_err(|e| PluginError::invalid_config("http_tamperer", e.to_string()))?;
        Ok(Box::new(Self::new(config)))
    }

    /// Rules after setup. Exposed for tests.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Apply request mutations in order: path, host, body, cookies,
    /// headers, method last.
    pub fn muck_request(&self, ctx: &mut Exchange) {
        let cfg = &self.config.request;
        let Some(request) = ctx.request.as_mut() else {
            return;
        };

        if !cfg.path.is_empty() {
            debug!(from = %request.path, to = %cfg.path, "tamperer spoofing request path");
            request.path = cfg.path.clone();
        }

        if !cfg.host.is_empty() {
            debug!(from = %request.host, to = %cfg.host, "tamperer spoofing request host");
            request.host = cfg.host.clone();
        }

        if !cfg.body.is_empty() {
            // Fresh-request semantics: the new body arrives on a request
            // rebuilt from method + URL, so existing headers are dropped.
            debug!(body = %cfg.body, "tamperer replacing request body");
            request.headers = http::HeaderMap::new();
            request.body = cfg.body.clone().into_bytes();
        }

        for cookie in &cfg.cookies {
            append_header(&mut request.headers, COOKIE.clone(), &cookie.header_value());
            debug!(cookie = %cookie.name, "tamperer injecting request cookie");
        }

        for (key, value) in &cfg.headers {
            set_header(&mut request.headers, key, value);
        }

        if !cfg.method.is_empty() {
            match cfg.method.to_uppercase().parse::<http::Method>() {
                Ok(method) => {
                    debug!(from = %request.method, to = %method, "tamperer spoofing request method");
                    request.method = method;
                }
                Err(e) => warn!(method = %cfg.method, "ignoring invalid method override: {e}"),
            }
        }
    }

    /// Apply response mutations in order: body, cookies, headers, status
    /// last.
    pub fn muck_response(&self, ctx: &mut Exchange) {
        let cfg = &self.config.response;
        let Some(response) = ctx.response.as_mut() else {
            return;
        };

        if !cfg.body.is_empty() {
            // Unlike the request leg, every other response field survives.
            debug!(body = %cfg.body, "tamperer injecting response body");
            response.body = cfg.body.clone().into_bytes();
        }

        for cookie in &cfg.cookies {
            append_header(&mut response.headers, SET_COOKIE.clone(), &cookie.header_value());
            debug!(cookie = %cookie.name, "tamperer injecting response cookie");
        }

        for (key, value) in &cfg.headers {
            append_named_header(&mut response.headers, key, value);
        }

        if cfg.status != 0 {
            match StatusCode::from_u16(cfg.status) {
                Ok(status) => {
                    debug!(from = %response.status, to = %status, "tamperer spoofing response status");
                    response.status = status;
                }
                Err(e) => warn!(status = cfg.status, "ignoring invalid status override: {e}"),
            }
        }
    }
}

/// Normalize a configured header name: underscores become hyphens (lookup
/// is case-insensitive, matching canonical-form behaviour on the wire).
fn tampered_header_name(key: &str) -> Option<HeaderName> {
    let normalized = key.replace('_', "-");
    match HeaderName::from_bytes(normalized.as_bytes()) {
        Ok(name) => Some(name),
        Err(e) => {
            warn!(header = key, "ignoring invalid header name: {e}");
            None
        }
    }
}

fn set_header(headers: &mut http::HeaderMap, key: &str, value: &str) {
    let Some(name) = tampered_header_name(key) else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(v) => {
            debug!(header = %name, value, "tamperer spoofing header");
            headers.insert(name, v);
        }
        Err(e) => warn!(header = key, "ignoring invalid header value: {e}"),
    }
}

fn append_named_header(headers: &mut http::HeaderMap, key: &str, value: &str) {
    let Some(name) = tampered_header_name(key) else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(v) => {
            debug!(header = %name, value, "tamperer spoofing header");
            headers.append(name, v);
        }
        Err(e) => warn!(header = key, "ignoring invalid header value: {e}"),
    }
}

fn append_header(headers: &mut http::HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.append(name, v);
        }
        Err(e) => warn!(header = %name, "ignoring invalid header value: {e}"),
    }
}

#[async_trait]
impl Middleware for HttpTampererSymptom {
    fn name(&self) -> &'static str {
        "http_tamperer"
    }

    fn setup(&mut self) -> Result<(), PluginError> {
        debug!("HTTP tamperer setup");
        // Default catch-all rule, only when none are supplied.
        self.rules = compile_rules(&expand_default(&self.config.matching_rules), self.name())?;
        Ok(())
    }

    async fn handle_event(&self, event: ProxyEvent, ctx: &mut Exchange) {
        if !any_match(&self.rules, ctx) {
            debug!("HTTP tamperer miss");
            return;
        }

        match event {
            ProxyEvent::PreDispatch => self.muck_request(ctx),
            ProxyEvent::PostDispatch => self.muck_response(ctx),
        }
    }

    fn teardown(&self) {
        debug!("HTTP tamperer teardown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{HttpExchangeRequest, HttpExchangeResponse};
    use http::{HeaderMap, Method};

    fn http_request_exchange() -> Exchange {
        let mut headers = HeaderMap::new();
        headers.insert("x-existing", HeaderValue::from_static("yes"));
        Exchange::for_http(HttpExchangeRequest {
            method: Method::GET,
            scheme: "http".into(),
            host: "origin.example".into(),
            path: "/orig".into(),
            query: None,
            headers,
            body: b"original".to_vec(),
        })
    }

    fn symptom(config: HttpTampererConfig) -> HttpTampererSymptom {
        let mut s = HttpTampererSymptom::new(config);
        s.setup().unwrap();
        s
    }

    #[tokio::test]
    async fn test_muck_response_full_rewrite() {
        let s = symptom(HttpTampererConfig {
            response: ResponseTamperConfig {
                body: "my new body".into(),
                headers: HashMap::from([("MyNewHeader".to_string(), "MyNewHeader".to_string())]),
                cookies: vec![CookieConfig {
                    name: "MyNewCookie".into(),
                    value: "MyNewValue".into(),
                    ..Default::default()
                }],
                status: 200,
            },
            ..Default::default()
        });

        let mut ctx = http_request_exchange();
        ctx.response = Some(HttpExchangeResponse::new(
            StatusCode::MOVED_PERMANENTLY,
            b"redirecting".to_vec(),
        ));

        s.handle_event(ProxyEvent::PostDispatch, &mut ctx).await;

        let response = ctx.response.unwrap();
        assert_eq!(response.body, b"my new body");
        assert_eq!(
            response.headers.get("MyNewHeader").unwrap(),
            "MyNewHeader"
        );
        assert_eq!(response.status, StatusCode::OK);
        let cookie = response.headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("MyNewCookie=MyNewValue"));
    }

    #[tokio::test]
    async fn test_muck_request_order_and_fresh_request_semantics() {
        let s = symptom(HttpTampererConfig {
            request: RequestTamperConfig {
                path: "/new/path".into(),
                host: "spoofed.example".into(),
                body: "replacement".into(),
                headers: HashMap::from([("x_custom_header".to_string(), "v".to_string())]),
                method: "post".into(),
                ..Default::default()
            },
            ..Default::default()
        });

        let mut ctx = http_request_exchange();
        s.handle_event(ProxyEvent::PreDispatch, &mut ctx).await;

        let request = ctx.request.unwrap();
        assert_eq!(request.path, "/new/path");
        assert_eq!(request.host, "spoofed.example");
        assert_eq!(request.body, b"replacement");
        assert_eq!(request.method, Method::POST);
        // Body replacement rebuilt the request: pre-existing headers gone,
        // later injections present.
        assert!(request.headers.get("x-existing").is_none());
        assert_eq!(request.headers.get("x-custom-header").unwrap(), "v");
    }

    #[tokio::test]
    async fn test_request_cookie_injection() {
        let s = symptom(HttpTampererConfig {
            request: RequestTamperConfig {
                cookies: vec![CookieConfig {
                    name: "session".into(),
                    value: "tampered".into(),
                    expires: "Sun, 06 Nov 2094 08:49:37 GMT".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        });

        let mut ctx = http_request_exchange();
        s.handle_event(ProxyEvent::PreDispatch, &mut ctx).await;

        let request = ctx.request.unwrap();
        let cookie = request.headers.get(COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("session=tampered"));
        assert!(cookie.contains("Expires=Sun, 06 Nov 2094"));
    }

    #[tokio::test]
    async fn test_miss_leaves_exchange_untouched() {
        let s = symptom(HttpTampererConfig {
            request: RequestTamperConfig {
                path: "/changed".into(),
                ..Default::default()
            },
            matching_rules: vec![MatchingRule {
                host: "only-this-host".into(),
                ..Default::default()
            }],
            ..Default::default()
        });

        let mut ctx = http_request_exchange();
        s.handle_event(ProxyEvent::PreDispatch, &mut ctx).await;
        assert_eq!(ctx.request.unwrap().path, "/orig");
    }

    #[test]
    fn test_setup_replaces_empty_rules_only() {
        let s = symptom(HttpTampererConfig::default());
        assert_eq!(s.rules().len(), 1);

        let s = symptom(HttpTampererConfig {
            matching_rules: vec![MatchingRule::default()],
            ..Default::default()
        });
        assert_eq!(s.rules().len(), 1);
    }

    #[test]
    fn test_parse_expiry_rfc1123() {
        let t = parse_expiry("Mon, 02 Jan 2006 15:04:05 GMT");
        assert!(t.is_some());
    }

    #[test]
    fn test_parse_expiry_legacy_format() {
        let t = parse_expiry("Mon, 02-Jan-2006 15:04:05 MST");
        assert!(t.is_some());
    }

    #[test]
    fn test_parse_expiry_garbage_yields_none() {
        assert!(parse_expiry("not a date").is_none());
        assert!(parse_expiry("").is_none());
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = CookieConfig {
            name: "c".into(),
            value: "v".into(),
            path: "/app".into(),
            domain: "example.com".into(),
            max_age: 300,
            secure: true,
            http_only: true,
            ..Default::default()
        };
        let rendered = cookie.header_value();
        assert_eq!(
            rendered,
            "c=v; Path=/app; Domain=example.com; Max-Age=300; HttpOnly; Secure"
        );
    }

    #[test]
    fn test_header_name_underscores_become_hyphens() {
        let name = tampered_header_name("content_type_extra").unwrap();
        assert_eq!(name.as_str(), "content-type-extra");
    }
}
