//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ServerContext::run(port)
//!     → listener.rs (bind host:port, non-blocking std socket)
//!     → tls.rs (optional rustls acceptor, ALPN h2/http1.1)
//!     → axum-server accept loop
//!     → connection.rs (live WebSocket connection tracking)
//! ```
//!
//! # Design Decisions
//! - TLS material is loaded at init; failure there is fatal
//! - Binding is deferred to `run`
//! - WebSocket connections are tracked so shutdown can close them

pub mod connection;
pub mod listener;
pub mod tls;
