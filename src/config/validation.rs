//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, paths well-formed)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Proxy rules are not validated here; a bad rule disables the proxy engine
//!   at startup instead of aborting it

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.host must not be empty")]
    EmptyHost,

    #[error("listener.tls.{0} must not be empty")]
    EmptyTlsPath(&'static str),

    #[error("websocket.path must start with '/' (got {0:?})")]
    WebSocketPath(String),

    #[error("limits.{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("session.cookie_name must not be empty")]
    EmptyCookieName,
}

/// Check a parsed configuration, collecting every error found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("cert_path"));
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("key_path"));
        }
    }

    if config.websocket.enabled && !config.websocket.path.starts_with('/') {
        errors.push(ValidationError::WebSocketPath(config.websocket.path.clone()));
    }

    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::ZeroLimit("max_body_size"));
    }
    if config.limits.body_timeout_secs == 0 {
        errors.push(ValidationError::ZeroLimit("body_timeout_secs"));
    }
    if config.limits.response_timeout_secs == 0 {
        errors.push(ValidationError::ZeroLimit("response_timeout_secs"));
    }

    if config.session.cookie_name.trim().is_empty() {
        errors.push(ValidationError::EmptyCookieName);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
