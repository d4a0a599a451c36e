//! WebSocket transport.
//!
//! # Responsibilities
//! - Detect upgrade requests on the configured path
//! - Complete the handshake and bind the connection to a session
//! - Turn every text frame into a `NormalizedRequest` with a `WsResponder`
//!
//! # Data Flow
//! ```text
//! Client ── text frame ──→ read loop ── NormalizedRequest ──→ Processor
//!   ▲                                                            │
//!   └──── writer task ◀── outbox (mpsc) ◀── WsResponder ◀────────┘
//! ```
//!
//! # Design Decisions
//! - One writer task per connection; responders only hold an outbox sender
//! - Messages are processed concurrently; `_index` correlates the replies
//! - Binary frames are ignored

use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::WebSocketConfig;
use crate::http::request::{parse_ws_message, NormalizedRequest};
use crate::http::response::{Responder, Respond, WsResponder};
use crate::net::connection::ConnectionTracker;
use crate::processor::Processor;
use crate::session::{bind_session, SessionHandle, SessionStore};

/// Accepts WebSocket upgrades and runs their connections.
#[derive(Debug, Clone)]
pub struct WebSocketServer {
    path: String,
    tracker: ConnectionTracker,
    shutdown: CancellationToken,
}

impl WebSocketServer {
    pub fn new(config: &WebSocketConfig) -> Self {
        Self {
            path: config.path.clone(),
            tracker: ConnectionTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether this request asks for an upgrade on our path.
    pub fn accepts<B>(&self, request: &Request<B>) -> bool {
        let wants_upgrade = request
            .headers()
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

        wants_upgrade && request.uri().path() == self.path
    }

    /// Complete the handshake and spawn the connection.
    pub async fn upgrade(
        &self,
        request: Request<Body>,
        processor: Arc<dyn Processor>,
        sessions: Arc<dyn SessionStore>,
        cookie_name: &str,
    ) -> Response {
        let (mut parts, _body) = request.into_parts();
        let bound = bind_session(&parts.headers, cookie_name, &sessions);

        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };

        let server = self.clone();
        let session = bound.handle.clone();
        let mut response = upgrade.on_upgrade(move |socket| async move {
            server.serve_connection(socket, processor, session).await;
        });

        if let Some(cookie) = bound.set_cookie(cookie_name) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    }

    /// Close every open connection. New upgrades are still accepted until the
    /// listener stops.
    pub fn close(&self) {
        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, "Closing WebSocket connections");
        }
        self.shutdown.cancel();
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    async fn serve_connection(self, socket: WebSocket, processor: Arc<dyn Processor>, session: SessionHandle) {
        let guard = self.tracker.track();
        let conn_id = guard.id();
        tracing::debug!(conn_id = %conn_id, session = session.id(), "WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (outbox, mut inbox) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut counter: u64 = 0;
        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                frame = stream.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket read failed");
                    break;
                }
            };

            let index = counter;
            counter += 1;

            let message = match parse_ws_message(text.as_str()) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Rejected WebSocket message");
                    let responder = WsResponder::new(outbox.clone(), index);
                    if let Err(e) = responder.error(&e.to_string(), StatusCode::BAD_REQUEST).await {
                        tracing::debug!(conn_id = %conn_id, error = %e, "Error reply not delivered");
                    }
                    continue;
                }
            };

            let responder = WsResponder::new(outbox.clone(), message.index.unwrap_or(index));
            let session = match &message.sid {
                Some(sid) => session.with_id(sid.clone()),
                None => session.clone(),
            };

            let request = NormalizedRequest::from_ws_message(message, session, Responder::WebSocket(responder));
            tracing::trace!(conn_id = %conn_id, path = request.path(), "WebSocket message");
            tokio::spawn(processor.process(request));
        }

        // In-flight replies keep the writer alive through their outbox clones.
        drop(outbox);
        if self.shutdown.is_cancelled() {
            writer.abort();
        }
        tracing::debug!(conn_id = %conn_id, "WebSocket disconnected");
    }
}
