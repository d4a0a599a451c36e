//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve and bind the configured host and port
//! - Hand a non-blocking std listener to the HTTP server
//!
//! # Design Decisions
//! - Binding happens in `run`, not at construction, so handlers can be wired
//!   before any traffic is accepted
//! - Port 0 binds an ephemeral port; the real address is reported back

use std::net::{SocketAddr, TcpListener};

use thiserror::Error;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bind `host:port` and prepare the socket for the async runtime.
pub fn bind(host: &str, port: u16) -> Result<(TcpListener, SocketAddr), ListenerError> {
    let wrap = |source: std::io::Error| ListenerError::Bind {
        addr: format!("{host}:{port}"),
        source,
    };

    let listener = TcpListener::bind((host, port)).map_err(wrap)?;
    listener.set_nonblocking(true).map_err(wrap)?;
    let local_addr = listener.local_addr().map_err(wrap)?;

    tracing::info!(address = %local_addr, "Listener bound");
    Ok((listener, local_addr))
}
