//! Request normalization.
//!
//! # Responsibilities
//! - Classify paths into filesystem, API or plain requests
//! - Read POST bodies (JSON or multipart) under size and time limits
//! - Parse WebSocket text frames into one-shot requests
//! - Build the immutable `NormalizedRequest` handed to the processing core
//!
//! # Design Decisions
//! - Non-POST requests carry an empty payload; the body is never read
//! - Parse failures never escape: they map to a status answered via the responder
//! - Uploaded files are written to the configured temp directory and removed
//!   again if the request fails part-way

use std::path::PathBuf;
use std::time::Duration;

use axum::body::Body;
use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::FromRequest;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use futures_util::StreamExt;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{LimitsConfig, UploadConfig};
use crate::http::response::Responder;
use crate::session::SessionHandle;

const FS_PREFIX: &str = "/FS";
const API_PREFIX: &str = "/API";

/// Failure while turning raw input into a request payload.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("timed out receiving request body")]
    Timeout,

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed multipart body: {message}")]
    Multipart { status: StatusCode, message: String },

    #[error("failed to store upload: {0}")]
    Upload(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Message(String),
}

impl NormalizeError {
    /// Status the client is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            NormalizeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            NormalizeError::Timeout => StatusCode::REQUEST_TIMEOUT,
            NormalizeError::Body(_) | NormalizeError::Json(_) | NormalizeError::Message(_) => {
                StatusCode::BAD_REQUEST
            }
            NormalizeError::Multipart { status, .. } => *status,
            NormalizeError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A file received through a multipart upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedFile {
    /// Form field the file was sent under.
    pub field: String,
    /// Temp path the contents were written to.
    pub path: PathBuf,
    /// File name declared by the client.
    pub filename: String,
    pub size: u64,
    pub mime: Option<String>,
}

/// Body-derived part of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub data: Value,
    pub files: Vec<UploadedFile>,
}

impl Default for RequestPayload {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
            files: Vec::new(),
        }
    }
}

/// Classification of a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathClass {
    pub endpoint: String,
    pub is_filesystem_op: bool,
    pub is_api_op: bool,
}

/// Classify a path by its `/FS` or `/API` prefix.
///
/// The endpoint is the path with the prefix and one following `/` removed, or
/// the full path when neither prefix applies.
pub fn classify_path(path: &str) -> PathClass {
    let strip = |prefix: &str| {
        path.strip_prefix(prefix)
            .map(|rest| rest.strip_prefix('/').unwrap_or(rest).to_string())
    };

    if let Some(endpoint) = strip(FS_PREFIX) {
        PathClass {
            endpoint,
            is_filesystem_op: true,
            is_api_op: false,
        }
    } else if let Some(endpoint) = strip(API_PREFIX) {
        PathClass {
            endpoint,
            is_filesystem_op: false,
            is_api_op: true,
        }
    } else {
        PathClass {
            endpoint: path.to_string(),
            is_filesystem_op: false,
            is_api_op: false,
        }
    }
}

/// Percent-decode a raw request path.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Canonical, transport-independent request handed to the processing core.
#[derive(Debug)]
pub struct NormalizedRequest {
    method: Method,
    path: String,
    query: Option<String>,
    class: PathClass,
    payload: RequestPayload,
    session: SessionHandle,
    responder: Responder,
}

impl NormalizedRequest {
    pub fn new(
        method: Method,
        path: String,
        query: Option<String>,
        payload: RequestPayload,
        session: SessionHandle,
        responder: Responder,
    ) -> Self {
        let class = classify_path(&path);
        Self {
            method,
            path,
            query,
            class,
            payload,
            session,
            responder,
        }
    }

    /// Build a request from one WebSocket message, as if it were a POST.
    pub fn from_ws_message(message: WsMessage, session: SessionHandle, responder: Responder) -> Self {
        let (path, query) = match message.path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (message.path, None),
        };
        let data = match message.args {
            Value::Null => Value::Object(Map::new()),
            args => args,
        };
        Self::new(
            Method::POST,
            path,
            query,
            RequestPayload {
                data,
                files: Vec::new(),
            },
            session,
            responder,
        )
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn endpoint(&self) -> &str {
        &self.class.endpoint
    }

    pub fn is_filesystem_op(&self) -> bool {
        self.class.is_filesystem_op
    }

    pub fn is_api_op(&self) -> bool {
        self.class.is_api_op
    }

    pub fn data(&self) -> &Value {
        &self.payload.data
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.payload.files
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn transport(&self) -> &'static str {
        self.responder.transport()
    }

    /// Take the responder to answer the request. Consumes the request.
    pub fn into_responder(self) -> Responder {
        self.responder
    }
}

/// One WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WsMessage {
    pub path: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(rename = "_index", default)]
    pub index: Option<u64>,
}

/// Parse a WebSocket text frame.
pub fn parse_ws_message(text: &str) -> Result<WsMessage, NormalizeError> {
    serde_json::from_str(text).map_err(|e| NormalizeError::Message(e.to_string()))
}

enum BodyKind {
    Json,
    Multipart,
    Other,
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let essence = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if essence == "application/json" || essence.ends_with("+json") {
        BodyKind::Json
    } else if essence == "multipart/form-data" {
        BodyKind::Multipart
    } else {
        BodyKind::Other
    }
}

/// Read the payload of an HTTP request.
pub async fn read_payload(
    request: Request<Body>,
    limits: &LimitsConfig,
    uploads: &UploadConfig,
) -> Result<RequestPayload, NormalizeError> {
    if request.method() != Method::POST {
        return Ok(RequestPayload::default());
    }

    let deadline = Duration::from_secs(limits.body_timeout_secs);
    let read = async {
        match body_kind(request.headers()) {
            BodyKind::Json => read_json(request, limits.max_body_size).await,
            BodyKind::Multipart => read_multipart(request, limits.max_body_size, uploads).await,
            BodyKind::Other => {
                tracing::debug!("POST with unrecognized content type, body ignored");
                Ok(RequestPayload::default())
            }
        }
    };

    tokio::time::timeout(deadline, read)
        .await
        .map_err(|_| NormalizeError::Timeout)?
}

async fn read_json(request: Request<Body>, limit: usize) -> Result<RequestPayload, NormalizeError> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(NormalizeError::PayloadTooLarge { limit });
    }

    let mut stream = request.into_body().into_data_stream();
    let mut buf = Vec::with_capacity(declared.unwrap_or(0));
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| NormalizeError::Body(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(NormalizeError::PayloadTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }

    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(RequestPayload::default());
    }

    Ok(RequestPayload {
        data: serde_json::from_slice(&buf)?,
        files: Vec::new(),
    })
}

fn multipart_error(e: MultipartError) -> NormalizeError {
    NormalizeError::Multipart {
        status: e.status(),
        message: e.body_text(),
    }
}

async fn read_multipart(
    request: Request<Body>,
    limit: usize,
    uploads: &UploadConfig,
) -> Result<RequestPayload, NormalizeError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| NormalizeError::Multipart {
            status: StatusCode::BAD_REQUEST,
            message: e.body_text(),
        })?;

    let mut payload = RequestPayload::default();
    match collect_parts(&mut multipart, &mut payload, limit, uploads).await {
        Ok(()) => Ok(payload),
        Err(e) => {
            for file in &payload.files {
                let _ = tokio::fs::remove_file(&file.path).await;
            }
            Err(e)
        }
    }
}

async fn collect_parts(
    multipart: &mut Multipart,
    payload: &mut RequestPayload,
    limit: usize,
    uploads: &UploadConfig,
) -> Result<(), NormalizeError> {
    let mut fields = Map::new();
    let mut total = 0usize;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        let Some(filename) = field.file_name().map(str::to_string) else {
            let text = field.text().await.map_err(multipart_error)?;
            total += text.len();
            if total > limit {
                return Err(NormalizeError::PayloadTooLarge { limit });
            }
            fields.insert(name, Value::String(text));
            continue;
        };

        let mime = field.content_type().map(str::to_string);
        let path = uploads.temp_dir.join(format!("upload-{}", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;
        payload.files.push(UploadedFile {
            field: name,
            path: path.clone(),
            filename,
            size: 0,
            mime,
        });

        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            total += chunk.len();
            if total > limit {
                return Err(NormalizeError::PayloadTooLarge { limit });
            }
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if let Some(last) = payload.files.last_mut() {
            last.size = size;
        }
        tracing::debug!(path = %path.display(), size, "Upload stored");
    }

    payload.data = Value::Object(fields);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits() -> LimitsConfig {
        LimitsConfig::default()
    }

    fn post(content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/API/test")
            .header(header::CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap()
    }

    #[test]
    fn classifies_filesystem_paths() {
        let class = classify_path("/FS/foo/bar");
        assert!(class.is_filesystem_op);
        assert!(!class.is_api_op);
        assert_eq!(class.endpoint, "foo/bar");
    }

    #[test]
    fn classifies_api_paths() {
        let class = classify_path("/API/x");
        assert!(class.is_api_op);
        assert!(!class.is_filesystem_op);
        assert_eq!(class.endpoint, "x");
    }

    #[test]
    fn other_paths_unchanged() {
        let class = classify_path("/other");
        assert!(!class.is_api_op);
        assert!(!class.is_filesystem_op);
        assert_eq!(class.endpoint, "/other");

        assert_eq!(classify_path("/FS").endpoint, "");
        assert_eq!(classify_path("/fs/a").endpoint, "/fs/a");
    }

    #[test]
    fn decodes_percent_escapes() {
        assert_eq!(decode_path("/FS/home/my%20file.txt"), "/FS/home/my file.txt");
    }

    #[tokio::test]
    async fn get_has_empty_payload() {
        let request = Request::builder().uri("/API/x").body(Body::empty()).unwrap();
        let payload = read_payload(request, &limits(), &UploadConfig::default())
            .await
            .unwrap();
        assert_eq!(payload, RequestPayload::default());
        assert_eq!(payload.data, json!({}));
    }

    #[tokio::test]
    async fn reads_json_body() {
        let request = post("application/json; charset=utf-8", r#"{"path":"home:/","n":[1,2]}"#);
        let payload = read_payload(request, &limits(), &UploadConfig::default())
            .await
            .unwrap();
        assert_eq!(payload.data, json!({ "path": "home:/", "n": [1, 2] }));
        assert!(payload.files.is_empty());
    }

    #[tokio::test]
    async fn empty_json_body_is_empty_object() {
        let payload = read_payload(post("application/json", ""), &limits(), &UploadConfig::default())
            .await
            .unwrap();
        assert_eq!(payload.data, json!({}));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let err = read_payload(post("application/json", "{not json"), &limits(), &UploadConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Json(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_json_rejected() {
        let limits = LimitsConfig {
            max_body_size: 8,
            ..LimitsConfig::default()
        };
        let err = read_payload(post("application/json", r#"{"a":"0123456789"}"#), &limits, &UploadConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unknown_content_type_ignored() {
        let payload = read_payload(post("text/plain", "hello"), &limits(), &UploadConfig::default())
            .await
            .unwrap();
        assert_eq!(payload, RequestPayload::default());
    }

    #[tokio::test]
    async fn reads_multipart_fields_and_files() {
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"path\"\r\n\r\nhome:/docs\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nsome notes\r\n--{b}--\r\n",
            b = boundary
        );
        let request = post(&format!("multipart/form-data; boundary={boundary}"), body);

        let dir = std::env::temp_dir();
        let uploads = UploadConfig { temp_dir: dir.clone() };
        let payload = read_payload(request, &limits(), &uploads).await.unwrap();

        assert_eq!(payload.data, json!({ "path": "home:/docs" }));
        assert_eq!(payload.files.len(), 1);

        let file = &payload.files[0];
        assert_eq!(file.field, "upload");
        assert_eq!(file.filename, "notes.txt");
        assert_eq!(file.size, 10);
        assert_eq!(file.mime.as_deref(), Some("text/plain"));
        assert!(file.path.starts_with(&dir));
        assert_eq!(tokio::fs::read(&file.path).await.unwrap(), b"some notes");

        tokio::fs::remove_file(&file.path).await.unwrap();
    }

    #[tokio::test]
    async fn broken_multipart_is_client_error() {
        let request = post("multipart/form-data", "no boundary declared");
        let err = read_payload(request, &limits(), &UploadConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Multipart { .. }));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn parses_ws_message() {
        let message =
            parse_ws_message(r#"{"path":"/API/ping","args":{"a":1},"sid":"s1","_index":7}"#).unwrap();
        assert_eq!(message.path, "/API/ping");
        assert_eq!(message.args, json!({ "a": 1 }));
        assert_eq!(message.sid.as_deref(), Some("s1"));
        assert_eq!(message.index, Some(7));

        let minimal = parse_ws_message(r#"{"path":"/x"}"#).unwrap();
        assert_eq!(minimal.args, Value::Null);
        assert_eq!(minimal.index, None);

        assert_eq!(
            parse_ws_message("[1,2]").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
