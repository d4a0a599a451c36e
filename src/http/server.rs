//! Server context: owns the listener, the proxy engine and the WebSocket server.
//!
//! # Responsibilities
//! - Construct the transports in order (proxy, HTTP/TLS, WebSocket)
//! - Wire up middleware (tracing, request id, body limit)
//! - Dispatch every request: upgrade, proxy, or normalize and process
//! - Tear everything down on `destroy`
//!
//! # Design Decisions
//! - One context may listen per process (`lifecycle::ListeningGuard`)
//! - The processor answers through a oneshot; the handler bounds the wait
//! - A failed proxy build leaves the gateway running without the proxy

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::request::{decode_path, read_payload, NormalizedRequest};
use crate::http::response::{HttpResponder, Respond, Responder};
use crate::http::websocket::WebSocketServer;
use crate::lifecycle::{is_listening, LifecycleState, ListeningGuard};
use crate::net::{listener, tls};
use crate::observability::metrics;
use crate::processor::Processor;
use crate::proxy::ProxyEngine;
use crate::routing::RouteDecision;
use crate::session::{bind_session, MemorySessionStore, SessionStore};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub processor: Arc<dyn Processor>,
    pub sessions: Arc<dyn SessionStore>,
    pub proxy: Option<Arc<ProxyEngine>>,
    pub websocket: Option<WebSocketServer>,
}

struct RunningServer {
    handle: Handle,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Process-wide transport handles.
pub struct ServerContext {
    state: LifecycleState,
    config: Arc<GatewayConfig>,
    app: Option<AppState>,
    tls: Option<RustlsConfig>,
    running: Option<RunningServer>,
    guard: Option<ListeningGuard>,
}

impl Default for ServerContext {
    /// An uninitialized context. Only `destroy` is meaningful on it.
    fn default() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            config: Arc::new(GatewayConfig::default()),
            app: None,
            tls: None,
            running: None,
            guard: None,
        }
    }
}

impl ServerContext {
    /// Build every transport with an in-memory session store.
    pub async fn init(config: GatewayConfig, processor: impl Processor) -> Result<Self, GatewayError> {
        Self::init_with_sessions(config, Arc::new(processor), Arc::new(MemorySessionStore::new())).await
    }

    pub async fn init_with_sessions(
        config: GatewayConfig,
        processor: Arc<dyn Processor>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, GatewayError> {
        if is_listening() {
            return Err(GatewayError::AlreadyListening);
        }

        let config = Arc::new(config);
        let tls_settings = config.listener.tls.as_ref();

        let proxy = if config.proxy.enabled && !config.proxy.rules.is_empty() {
            match ProxyEngine::new(&config.proxy, tls_settings.is_some()) {
                Ok(engine) => Some(Arc::new(engine)),
                Err(e) => {
                    tracing::warn!(error = %e, "Proxy disabled");
                    None
                }
            }
        } else {
            None
        };

        let tls = match tls_settings {
            Some(settings) => Some(
                tls::load_tls_config(&settings.cert_path, &settings.key_path, config.listener.http2).await?,
            ),
            None => None,
        };

        let websocket = config
            .websocket
            .enabled
            .then(|| WebSocketServer::new(&config.websocket));

        tracing::info!(
            proxy = proxy.is_some(),
            tls = tls.is_some(),
            websocket = websocket.is_some(),
            "Server context initialized"
        );

        Ok(Self {
            state: LifecycleState::Initialized,
            config: Arc::clone(&config),
            app: Some(AppState {
                config,
                processor,
                sessions,
                proxy,
                websocket,
            }),
            tls,
            running: None,
            guard: None,
        })
    }

    /// Bind `listener.host:port` and start accepting. Returns the bound address.
    pub async fn run(&mut self, port: u16) -> Result<SocketAddr, GatewayError> {
        match self.state {
            LifecycleState::Uninitialized => return Err(GatewayError::NotInitialized),
            LifecycleState::Listening => return Err(GatewayError::AlreadyRunning),
            LifecycleState::Closed => return Err(GatewayError::Closed),
            LifecycleState::Initialized => {}
        }
        let app = self.app.clone().ok_or(GatewayError::NotInitialized)?;

        let guard = ListeningGuard::acquire().ok_or(GatewayError::AlreadyListening)?;
        let (std_listener, local_addr) = listener::bind(&self.config.listener.host, port)?;

        let handle = Handle::new();
        let service = build_router(app).into_make_service_with_connect_info::<SocketAddr>();
        let server_handle = handle.clone();

        let task = match self.tls.clone() {
            Some(tls) => tokio::spawn(async move {
                let server = axum_server::tls_rustls::from_tcp_rustls(std_listener, tls).handle(server_handle);
                if let Err(e) = server.serve(service).await {
                    tracing::error!(error = %e, "HTTPS server failed");
                }
            }),
            None => tokio::spawn(async move {
                let server = axum_server::from_tcp(std_listener).handle(server_handle);
                if let Err(e) = server.serve(service).await {
                    tracing::error!(error = %e, "HTTP server failed");
                }
            }),
        };

        tracing::info!(
            address = %local_addr,
            tls = self.tls.is_some(),
            "Gateway listening"
        );

        self.running = Some(RunningServer {
            handle,
            task,
            local_addr,
        });
        self.guard = Some(guard);
        self.state = LifecycleState::Listening;
        Ok(local_addr)
    }

    /// Close whatever exists. Idempotent; a no-op before `init`.
    pub async fn destroy(&mut self) {
        if matches!(self.state, LifecycleState::Uninitialized | LifecycleState::Closed) {
            return;
        }

        if let Some(websocket) = self.app.as_ref().and_then(|app| app.websocket.as_ref()) {
            websocket.close();
        }

        if let Some(running) = self.running.take() {
            let grace = Duration::from_secs(self.config.listener.shutdown_grace_secs);
            running.handle.graceful_shutdown(Some(grace));
            // The server forces remaining connections closed after `grace`.
            match tokio::time::timeout(grace + Duration::from_secs(1), running.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Server task panicked"),
                Err(_) => tracing::warn!("Server did not stop within the grace period"),
            }
            tracing::info!(address = %running.local_addr, "Gateway stopped");
        }

        self.app = None;
        self.tls = None;
        self.guard = None;
        self.state = LifecycleState::Closed;
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn proxy(&self) -> Option<&ProxyEngine> {
        self.app.as_ref()?.proxy.as_deref()
    }

    pub fn websocket(&self) -> Option<&WebSocketServer> {
        self.app.as_ref()?.websocket.as_ref()
    }
}

/// Build the Axum router with all middleware layers.
fn build_router(state: AppState) -> Router {
    let body_limit = state.config.limits.max_body_size;
    Router::new()
        .fallback(gateway_handler)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();

    if let Some(websocket) = state.websocket.as_ref().filter(|ws| ws.accepts(&request)) {
        return websocket
            .upgrade(
                request,
                Arc::clone(&state.processor),
                Arc::clone(&state.sessions),
                &state.config.session.cookie_name,
            )
            .await;
    }

    if let Some(proxy) = &state.proxy {
        let path = decode_path(request.uri().path());
        if let RouteDecision::Forward(target) = proxy.router().match_path(&path) {
            return proxy.forward(request, target, peer).await;
        }
    }

    let response = handle_local(&state, request).await;
    metrics::record_request("http", response.status().as_u16(), start);
    response
}

/// Normalize, hand to the processor and wait for its answer.
async fn handle_local(state: &AppState, request: Request<Body>) -> Response {
    let cookie_name = &state.config.session.cookie_name;
    let bound = bind_session(request.headers(), cookie_name, &state.sessions);

    let (mut responder, rx) = HttpResponder::new();
    if let Some(cookie) = bound.set_cookie(cookie_name) {
        responder = responder.with_header(header::SET_COOKIE, cookie);
    }

    let method = request.method().clone();
    let path = decode_path(request.uri().path());
    let query = request.uri().query().map(str::to_string);

    match read_payload(request, &state.config.limits, &state.config.uploads).await {
        Ok(payload) => {
            let normalized = NormalizedRequest::new(
                method,
                path.clone(),
                query,
                payload,
                bound.handle,
                Responder::Http(responder),
            );
            tokio::spawn(state.processor.process(normalized));
        }
        Err(e) => {
            tracing::debug!(method = %method, path = %path, error = %e, "Rejected request");
            if let Err(e) = responder.error(&e.to_string(), e.status()).await {
                tracing::debug!(error = %e, "Error reply not delivered");
            }
        }
    }

    let deadline = Duration::from_secs(state.config.limits.response_timeout_secs);
    match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => {
            tracing::error!(path = %path, "Processor dropped the request without answering");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Request was not answered")
        }
        Err(_) => {
            tracing::warn!(path = %path, timeout = ?deadline, "Processor timed out");
            error_response(StatusCode::GATEWAY_TIMEOUT, "Request timed out")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::NormalizedRequest;
    use crate::processor::EchoProcessor;
    use axum::extract::connect_info::MockConnectInfo;
    use tower::ServiceExt;

    fn local_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.listener.host = "127.0.0.1".to_string();
        config.listener.shutdown_grace_secs = 1;
        config
    }

    fn silent(_request: NormalizedRequest) -> std::future::Ready<()> {
        std::future::ready(())
    }

    fn app(processor: Arc<dyn Processor>) -> Router {
        let state = AppState {
            config: Arc::new(local_config()),
            processor,
            sessions: Arc::new(MemorySessionStore::new()),
            proxy: None,
            websocket: None,
        };
        build_router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
    }

    #[tokio::test]
    async fn local_requests_reach_the_processor() {
        let request = Request::builder().uri("/API/x").body(Body::empty()).unwrap();
        let response = app(Arc::new(EchoProcessor)).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn dropped_responder_is_internal_error() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app(Arc::new(silent)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn destroy_is_a_noop_before_init() {
        let mut context = ServerContext::default();
        context.destroy().await;
        context.destroy().await;
        assert_eq!(context.state(), LifecycleState::Uninitialized);
        assert!(context.local_addr().is_none());
    }

    #[tokio::test]
    async fn run_requires_init() {
        let mut context = ServerContext::default();
        assert!(matches!(context.run(0).await, Err(GatewayError::NotInitialized)));
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let _serial = crate::lifecycle::test_lock().await;

        let mut context = ServerContext::init(local_config(), silent).await.unwrap();
        assert_eq!(context.state(), LifecycleState::Initialized);

        let addr = context.run(0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(context.state(), LifecycleState::Listening);
        assert!(is_listening());
        assert!(matches!(context.run(0).await, Err(GatewayError::AlreadyRunning)));
        assert!(matches!(
            ServerContext::init(local_config(), silent).await,
            Err(GatewayError::AlreadyListening)
        ));

        context.destroy().await;
        assert_eq!(context.state(), LifecycleState::Closed);
        assert!(!is_listening());
        assert!(matches!(context.run(0).await, Err(GatewayError::Closed)));

        context.destroy().await;
        assert_eq!(context.state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn bad_proxy_rules_leave_proxy_absent() {
        let _serial = crate::lifecycle::test_lock().await;
        let mut config = local_config();
        config.proxy.rules.insert(
            "regexp/[/",
            crate::config::ProxyTarget::Url("http://127.0.0.1:1".into()),
        );

        let context = ServerContext::init(config, silent).await.unwrap();
        assert!(context.proxy().is_none());
        assert!(context.websocket().is_some());
    }

    #[tokio::test]
    async fn missing_tls_material_is_fatal() {
        let _serial = crate::lifecycle::test_lock().await;
        let mut config = local_config();
        config.listener.tls = Some(crate::config::TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        });

        assert!(matches!(
            ServerContext::init(config, silent).await,
            Err(GatewayError::Tls(_))
        ));
    }
}
