//! Server lifecycle states and the process-wide listening guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// Set while some `ServerContext` in this process is accepting traffic.
static LISTENING: AtomicBool = AtomicBool::new(false);

/// Lifecycle of a `ServerContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing constructed.
    Uninitialized,
    /// Handles constructed, not yet accepting.
    Initialized,
    /// Accepting traffic.
    Listening,
    /// Destroyed; cannot be restarted.
    Closed,
}

/// Whether any context in this process is listening.
pub fn is_listening() -> bool {
    LISTENING.load(Ordering::SeqCst)
}

/// Exclusive claim on the process-wide listening slot.
///
/// Released when dropped.
#[derive(Debug)]
pub struct ListeningGuard {
    _private: (),
}

impl ListeningGuard {
    /// Claim the slot, or `None` if another context already holds it.
    pub fn acquire() -> Option<Self> {
        LISTENING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { _private: () })
    }
}

impl Drop for ListeningGuard {
    fn drop(&mut self) {
        LISTENING.store(false, Ordering::SeqCst);
    }
}
