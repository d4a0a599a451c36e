//! Reverse-proxy engine.
//!
//! # Responsibilities
//! - Own the compiled rule table and the upstream HTTP client
//! - Stream a matched request to its upstream and the response back
//! - Turn upstream failures into 502/504 answers without crashing the connection
//!
//! # Design Decisions
//! - Bodies are streamed, never buffered (no retries, so no replay needed)
//! - Upstream requests always go out as HTTP/1.1
//! - `http://` and `https://` targets share one pooled client; other schemes fail construction
//! - Upstream certificates are checked against the bundled webpki roots

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::observability::metrics;
use crate::proxy::headers::{set_forwarded, strip_hop_by_hop};
use crate::routing::{ForwardTarget, RouteError, Router};

/// Errors raised while constructing the engine or forwarding through it.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy rule: {0}")]
    Rule(#[from] RouteError),

    #[error("invalid upstream target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid header {name:?} in rule {rule:?}")]
    InvalidHeader { rule: String, name: String },

    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
}

impl ProxyError {
    /// Status returned to the client for a forwarding failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Forwards matched requests to their upstream targets.
#[derive(Debug)]
pub struct ProxyEngine {
    router: Router,
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
    proto: &'static str,
}

impl ProxyEngine {
    /// Compile the rule table and build the upstream client.
    ///
    /// `tls` only affects the `X-Forwarded-Proto` value sent upstream.
    pub fn new(config: &ProxyConfig, tls: bool) -> Result<Self, ProxyError> {
        let router = Router::from_config(&config.rules)?;

        for rule in router.rules() {
            check_target(&rule.options.target)?;
            for name in rule.options.headers.keys() {
                if HeaderName::from_str(name).is_err() {
                    return Err(ProxyError::InvalidHeader {
                        rule: rule.key.clone(),
                        name: name.clone(),
                    });
                }
            }
        }

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        tracing::info!(rules = router.rules().len(), "Proxy engine ready");
        Ok(Self {
            router,
            client,
            timeout: Duration::from_secs(config.timeout_secs),
            proto: if tls { "https" } else { "http" },
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Forward a request. Failures are logged and answered, never propagated.
    pub async fn forward(&self, request: Request<Body>, target: ForwardTarget, peer: SocketAddr) -> Response {
        let start = Instant::now();
        let method = request.method().clone();

        match self.try_forward(request, &target, peer).await {
            Ok(response) => {
                tracing::debug!(
                    rule = %target.rule,
                    method = %method,
                    path = %target.path,
                    status = %response.status(),
                    "Proxied request"
                );
                metrics::record_proxy(&target.rule, response.status().as_u16(), start);
                response
            }
            Err(e) => {
                tracing::error!(
                    rule = %target.rule,
                    upstream = %target.options.target,
                    error = %e,
                    "Upstream error"
                );
                let status = e.status();
                metrics::record_proxy(&target.rule, status.as_u16(), start);
                (status, "Upstream request failed").into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        request: Request<Body>,
        target: &ForwardTarget,
        peer: SocketAddr,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let url = target.upstream_url(parts.uri.query());
        let uri = Uri::from_str(&url).map_err(|e| ProxyError::InvalidTarget {
            target: url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        set_forwarded(&mut headers, peer, self.proto);

        if target.options.change_origin {
            if let Some(authority) = uri.authority() {
                if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                    headers.insert(header::HOST, host);
                }
            }
        }
        for (name, value) in &target.options.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
                headers.insert(name, value);
            }
        }

        let mut upstream = Request::builder()
            .method(parts.method)
            .uri(uri)
            .version(Version::HTTP_11)
            .body(body)?;
        *upstream.headers_mut() = headers;

        let response = tokio::time::timeout(self.timeout, self.client.request(upstream))
            .await
            .map_err(|_| ProxyError::Timeout(self.timeout))??;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

fn check_target(target: &str) -> Result<(), ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    let url = url::Url::parse(target).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}
