//! Reverse-proxy pass-through.
//!
//! # Data Flow
//! ```text
//! HTTP request (not a WebSocket upgrade)
//!     → routing::Router (first matching rule)
//!     → engine.rs (rewrite URI, headers.rs, stream to upstream)
//!     → upstream response streamed back verbatim
//! ```
//!
//! # Design Decisions
//! - The engine is optional; if it cannot be built the gateway runs without it
//! - No retries, no fallback target

pub mod engine;
pub mod headers;

pub use engine::{ProxyEngine, ProxyError};
