//! HTTP-family transports.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → websocket.rs (upgrade on the configured path)
//!     → [proxy engine when a rule matches]
//!     → request.rs (normalize, bind session, read body)
//!     → Processor
//!     → response.rs (responder answers exactly once)
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{NormalizeError, NormalizedRequest, RequestPayload, UploadedFile};
pub use response::{ByteSource, FileOptions, HttpResponder, Respond, Responder, ResponseError, WsResponder};
pub use server::ServerContext;
pub use websocket::WebSocketServer;
