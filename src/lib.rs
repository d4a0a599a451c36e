//! Connection front door for the desktop backend.
//!
//! Accepts HTTP, HTTPS and WebSocket traffic on one socket, forwards requests
//! matching the proxy rule table to their upstreams, and turns everything else
//! into a [`NormalizedRequest`] answered through a transport-specific
//! [`Responder`].

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod processor;
pub mod proxy;
pub mod routing;
pub mod session;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::{NormalizedRequest, Respond, Responder, ServerContext};
pub use processor::{EchoProcessor, Processor};
pub use session::{MemorySessionStore, SessionHandle, SessionStore};
