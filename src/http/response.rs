//! Responders: one output strategy per transport.
//!
//! # Responsibilities
//! - Give the processing core one capability contract (`Respond`) for every transport
//! - HTTP: status line, headers, buffered or streamed body
//! - WebSocket: one JSON text frame per reply, correlated by `_index`
//!
//! # Design Decisions
//! - Every capability consumes the responder, so a second answer does not compile
//! - WebSocket cannot carry status codes or byte streams; `stream`/`file` answer
//!   with a structured error frame and return `ResponseError::Unsupported`
//! - A missing file is an ordinary 404 answer, not an error

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::ReaderStream;

use crate::observability::metrics;

/// Byte source piped into a streamed response.
pub type ByteSource = Pin<Box<dyn AsyncRead + Send>>;

const UNSUPPORTED_MESSAGE: &str = "Operation not available on this transport";

/// Failure to deliver a response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("connection closed before the response was delivered")]
    Closed,

    #[error("{0} is not available on this transport")]
    Unsupported(&'static str),

    #[error("failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    Http(#[from] axum::http::Error),
}

/// Options for [`Respond::file`].
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// MIME override; inferred from the extension otherwise.
    pub mime: Option<String>,
    /// Serve as an attachment with this file name.
    pub download: Option<String>,
}

/// Capability contract shared by every responder.
pub trait Respond: Send + Sized {
    /// Write status, headers and body, then close the response.
    fn raw(
        self,
        body: Bytes,
        status: StatusCode,
        headers: HeaderMap,
    ) -> impl Future<Output = Result<(), ResponseError>> + Send;

    /// Answer with an error message.
    fn error(
        self,
        message: &str,
        status: StatusCode,
    ) -> impl Future<Output = Result<(), ResponseError>> + Send;

    /// Answer with a JSON document. String payloads are sent as-is.
    fn json(
        self,
        payload: Value,
        status: StatusCode,
    ) -> impl Future<Output = Result<(), ResponseError>> + Send;

    /// Pipe a byte source into the response.
    fn stream(
        self,
        path: &Path,
        source: ByteSource,
        status: StatusCode,
        mime: Option<&str>,
    ) -> impl Future<Output = Result<(), ResponseError>> + Send;

    /// Serve a file from disk; 404 when it does not exist.
    fn file(
        self,
        path: &Path,
        options: FileOptions,
        status: StatusCode,
    ) -> impl Future<Output = Result<(), ResponseError>> + Send;
}

/// Responder bound to one HTTP request.
///
/// The response is handed to the connection through a oneshot channel that the
/// request handler awaits.
#[derive(Debug)]
pub struct HttpResponder {
    tx: oneshot::Sender<Response>,
    headers: HeaderMap,
}

impl HttpResponder {
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx,
                headers: HeaderMap::new(),
            },
            rx,
        )
    }

    /// Header added to whatever response is eventually sent.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    fn send(self, status: StatusCode, headers: HeaderMap, body: Body) -> Result<(), ResponseError> {
        let mut builder = Response::builder().status(status);
        if let Some(target) = builder.headers_mut() {
            target.extend(self.headers);
            target.extend(headers);
        }
        let response = builder.body(body)?;
        self.tx.send(response).map_err(|_| ResponseError::Closed)
    }

    fn stream_with(
        self,
        path: &Path,
        source: ByteSource,
        status: StatusCode,
        mime: Option<&str>,
        mut headers: HeaderMap,
    ) -> Result<(), ResponseError> {
        let content_type = match mime {
            Some(mime) => HeaderValue::from_str(mime).ok(),
            None => HeaderValue::from_str(mime_guess::from_path(path).first_or_octet_stream().as_ref()).ok(),
        };
        if let Some(value) = content_type {
            headers.insert(header::CONTENT_TYPE, value);
        }
        let body = Body::from_stream(ReaderStream::new(source));
        self.send(status, headers, body)
    }
}

impl Respond for HttpResponder {
    async fn raw(self, body: Bytes, status: StatusCode, headers: HeaderMap) -> Result<(), ResponseError> {
        self.send(status, headers, Body::from(body))
    }

    async fn error(self, message: &str, status: StatusCode) -> Result<(), ResponseError> {
        self.json(json!({ "error": message }), status).await
    }

    async fn json(self, payload: Value, status: StatusCode) -> Result<(), ResponseError> {
        let body = match payload {
            Value::String(text) => Bytes::from(text),
            other => Bytes::from(serde_json::to_vec(&other)?),
        };
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.raw(body, status, headers).await
    }

    async fn stream(
        self,
        path: &Path,
        source: ByteSource,
        status: StatusCode,
        mime: Option<&str>,
    ) -> Result<(), ResponseError> {
        self.stream_with(path, source, status, mime, HeaderMap::new())
    }

    async fn file(self, path: &Path, options: FileOptions, status: StatusCode) -> Result<(), ResponseError> {
        let exists = matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file());
        if !exists {
            tracing::debug!(path = %path.display(), "File not found");
            return self.error("File not found", StatusCode::NOT_FOUND).await;
        }

        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to open file");
                return self.error("Unable to read file", StatusCode::INTERNAL_SERVER_ERROR).await;
            }
        };

        let mut headers = HeaderMap::new();
        if let Some(name) = &options.download {
            let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
        }

        let source: ByteSource = Box::pin(BufReader::new(file));
        self.stream_with(path, source, status, options.mime.as_deref(), headers)
    }
}

/// Responder bound to one message of a WebSocket connection.
#[derive(Debug)]
pub struct WsResponder {
    outbox: mpsc::UnboundedSender<String>,
    index: u64,
    received: Instant,
}

impl WsResponder {
    pub fn new(outbox: mpsc::UnboundedSender<String>, index: u64) -> Self {
        Self {
            outbox,
            index,
            received: Instant::now(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Send one frame. `status` is only recorded; the frame carries no status line.
    fn send_value(self, mut value: Value, status: StatusCode) -> Result<(), ResponseError> {
        if let Value::Object(map) = &mut value {
            map.insert("_index".to_string(), Value::from(self.index));
        }
        let frame = serde_json::to_string(&value)?;
        self.outbox.send(frame).map_err(|_| ResponseError::Closed)?;
        metrics::record_request("websocket", status.as_u16(), self.received);
        Ok(())
    }

    fn unsupported(self, operation: &'static str) -> Result<(), ResponseError> {
        tracing::debug!(operation, index = self.index, "Unsupported responder call on WebSocket");
        self.send_value(
            json!({
                "error": UNSUPPORTED_MESSAGE,
                "status": StatusCode::NOT_IMPLEMENTED.as_u16(),
            }),
            StatusCode::NOT_IMPLEMENTED,
        )?;
        Err(ResponseError::Unsupported(operation))
    }
}

impl Respond for WsResponder {
    async fn raw(self, body: Bytes, status: StatusCode, _headers: HeaderMap) -> Result<(), ResponseError> {
        let value = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        self.send_value(value, status)
    }

    async fn error(self, message: &str, status: StatusCode) -> Result<(), ResponseError> {
        self.send_value(json!({ "error": message, "status": status.as_u16() }), status)
    }

    async fn json(self, payload: Value, status: StatusCode) -> Result<(), ResponseError> {
        self.send_value(payload, status)
    }

    async fn stream(
        self,
        _path: &Path,
        _source: ByteSource,
        _status: StatusCode,
        _mime: Option<&str>,
    ) -> Result<(), ResponseError> {
        self.unsupported("stream")
    }

    async fn file(self, _path: &Path, _options: FileOptions, _status: StatusCode) -> Result<(), ResponseError> {
        self.unsupported("file")
    }
}

/// The responder bound to a normalized request.
#[derive(Debug)]
pub enum Responder {
    Http(HttpResponder),
    WebSocket(WsResponder),
}

impl Responder {
    /// Transport label used in logs and metrics.
    pub fn transport(&self) -> &'static str {
        match self {
            Responder::Http(_) => "http",
            Responder::WebSocket(_) => "websocket",
        }
    }
}

impl Respond for Responder {
    async fn raw(self, body: Bytes, status: StatusCode, headers: HeaderMap) -> Result<(), ResponseError> {
        match self {
            Responder::Http(r) => r.raw(body, status, headers).await,
            Responder::WebSocket(r) => r.raw(body, status, headers).await,
        }
    }

    async fn error(self, message: &str, status: StatusCode) -> Result<(), ResponseError> {
        match self {
            Responder::Http(r) => r.error(message, status).await,
            Responder::WebSocket(r) => r.error(message, status).await,
        }
    }

    async fn json(self, payload: Value, status: StatusCode) -> Result<(), ResponseError> {
        match self {
            Responder::Http(r) => r.json(payload, status).await,
            Responder::WebSocket(r) => r.json(payload, status).await,
        }
    }

    async fn stream(
        self,
        path: &Path,
        source: ByteSource,
        status: StatusCode,
        mime: Option<&str>,
    ) -> Result<(), ResponseError> {
        match self {
            Responder::Http(r) => r.stream(path, source, status, mime).await,
            Responder::WebSocket(r) => r.stream(path, source, status, mime).await,
        }
    }

    async fn file(self, path: &Path, options: FileOptions, status: StatusCode) -> Result<(), ResponseError> {
        match self {
            Responder::Http(r) => r.file(path, options, status).await,
            Responder::WebSocket(r) => r.file(path, options, status).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    fn frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("no frame sent")).unwrap()
    }

    #[tokio::test]
    async fn ws_json_attaches_index() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        WsResponder::new(tx, 7)
            .json(json!({ "a": 1 }), StatusCode::OK)
            .await
            .unwrap();

        assert_eq!(frame(&mut rx), json!({ "a": 1, "_index": 7 }));
    }

    #[tokio::test]
    async fn ws_non_object_payload_untagged() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        WsResponder::new(tx, 3)
            .json(json!([1, 2]), StatusCode::OK)
            .await
            .unwrap();
        assert_eq!(frame(&mut rx), json!([1, 2]));
    }

    #[tokio::test]
    async fn ws_raw_and_error_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        WsResponder::new(tx.clone(), 1)
            .raw(Bytes::from_static(br#"{"ok":true}"#), StatusCode::OK, HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(frame(&mut rx), json!({ "ok": true, "_index": 1 }));

        WsResponder::new(tx.clone(), 2)
            .raw(Bytes::from_static(b"plain text"), StatusCode::OK, HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(frame(&mut rx), json!("plain text"));

        WsResponder::new(tx, 4)
            .error("Nope", StatusCode::FORBIDDEN)
            .await
            .unwrap();
        assert_eq!(frame(&mut rx), json!({ "error": "Nope", "status": 403, "_index": 4 }));
    }

    #[tokio::test]
    async fn ws_stream_and_file_unsupported() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let source: ByteSource = Box::pin(&b"data"[..]);
        let result = WsResponder::new(tx.clone(), 5)
            .stream(Path::new("a.txt"), source, StatusCode::OK, None)
            .await;
        assert!(matches!(result, Err(ResponseError::Unsupported("stream"))));
        assert_eq!(
            frame(&mut rx),
            json!({ "error": UNSUPPORTED_MESSAGE, "status": 501, "_index": 5 })
        );

        let result = WsResponder::new(tx, 6)
            .file(Path::new("a.txt"), FileOptions::default(), StatusCode::OK)
            .await;
        assert!(matches!(result, Err(ResponseError::Unsupported("file"))));
        assert_eq!(frame(&mut rx)["_index"], 6);
    }

    #[test]
    fn ws_replies_are_counted_by_transport() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let (tx, _rx) = mpsc::unbounded_channel();

        ::metrics::with_local_recorder(&recorder, || {
            WsResponder::new(tx.clone(), 1)
                .send_value(json!({ "ok": true }), StatusCode::OK)
                .unwrap();
            WsResponder::new(tx, 2)
                .send_value(json!({ "error": "bad" }), StatusCode::BAD_REQUEST)
                .unwrap();
        });

        let rendered = handle.render();
        let counted: Vec<&str> = rendered
            .lines()
            .filter(|line| line.starts_with("gateway_requests_total{"))
            .collect();
        assert_eq!(counted.len(), 2, "rendered: {rendered}");
        assert!(counted.iter().all(|line| line.contains(r#"transport="websocket""#)));
        assert!(counted.iter().any(|line| line.contains(r#"status="400""#)));
    }

    #[tokio::test]
    async fn ws_closed_connection() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let result = WsResponder::new(tx, 0).json(json!({}), StatusCode::OK).await;
        assert!(matches!(result, Err(ResponseError::Closed)));
    }

    #[tokio::test]
    async fn http_json_sets_content_type() {
        let (responder, rx) = HttpResponder::new();
        responder
            .json(json!({ "a": 1 }), StatusCode::CREATED)
            .await
            .unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(&body_of(response).await[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn http_extra_headers_survive() {
        let (responder, rx) = HttpResponder::new();
        responder
            .with_header(header::SET_COOKIE, HeaderValue::from_static("sid=1"))
            .error("Bad", StatusCode::BAD_REQUEST)
            .await
            .unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::SET_COOKIE], "sid=1");
        assert_eq!(&body_of(response).await[..], br#"{"error":"Bad"}"#);
    }

    #[tokio::test]
    async fn http_file_not_found() {
        let (responder, rx) = HttpResponder::new();
        let missing = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
        responder
            .file(&missing, FileOptions::default(), StatusCode::OK)
            .await
            .unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(&body_of(response).await[..], br#"{"error":"File not found"}"#);
    }

    #[tokio::test]
    async fn http_file_streams_contents() {
        let path = std::env::temp_dir().join(format!("served-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"hello file").await.unwrap();

        let (responder, rx) = HttpResponder::new();
        let options = FileOptions {
            download: Some("report.txt".into()),
            ..FileOptions::default()
        };
        responder.file(&path, options, StatusCode::OK).await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.txt\""
        );
        assert_eq!(&body_of(response).await[..], b"hello file");

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn http_stream_honours_mime_override() {
        let (responder, rx) = HttpResponder::new();
        let source: ByteSource = Box::pin(&b"abc"[..]);
        responder
            .stream(Path::new("x.bin"), source, StatusCode::OK, Some("image/png"))
            .await
            .unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(&body_of(response).await[..], b"abc");
    }

    #[tokio::test]
    async fn http_receiver_gone() {
        let (responder, rx) = HttpResponder::new();
        drop(rx);
        let result = responder.json(json!({}), StatusCode::OK).await;
        assert!(matches!(result, Err(ResponseError::Closed)));
    }
}
