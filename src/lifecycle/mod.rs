//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! ServerContext::init:
//!     proxy engine (optional, failure swallowed) → HTTP server (TLS fatal) → WebSocket server
//!
//! ServerContext::run(port):
//!     claim listening slot → bind → accept
//!
//! ServerContext::destroy:
//!     close WebSocket connections → graceful HTTP shutdown → release slot
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → destroy
//! ```
//!
//! # Design Decisions
//! - Only one context may listen per process (state.rs guard)
//! - destroy is idempotent and safe on an uninitialized context

pub mod signals;
pub mod state;

pub use state::{is_listening, LifecycleState, ListeningGuard};

/// Serializes unit tests that touch the process-wide listening slot.
#[cfg(test)]
pub(crate) async fn test_lock() -> tokio::sync::MutexGuard<'static, ()> {
    static LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());
    LOCK.lock().await
}
