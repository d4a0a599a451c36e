//! Errors surfaced by the gateway's public lifecycle.

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::listener::ListenerError;
use crate::net::tls::TlsError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("another server context is already listening in this process")]
    AlreadyListening,

    #[error("server context has not been initialized")]
    NotInitialized,

    #[error("server context is already running")]
    AlreadyRunning,

    #[error("server context has been destroyed")]
    Closed,
}
