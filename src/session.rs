//! Session binding.
//!
//! Every connection is bound to a session id before any body handling. Reads
//! and writes go through a [`SessionStore`]; the gateway itself only threads
//! the id through to the processing core.

use std::fmt;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use dashmap::DashMap;
use uuid::Uuid;

/// Keyed text storage shared by all sessions.
pub trait SessionStore: Send + Sync + 'static {
    /// Returns `None` when the key was never set for this session.
    fn get(&self, sid: &str, key: &str) -> Option<String>;

    fn set(&self, sid: &str, key: &str, value: String);
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: DashMap<(String, String), String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, sid: &str, key: &str) -> Option<String> {
        self.entries
            .get(&(sid.to_string(), key.to_string()))
            .map(|v| v.value().clone())
    }

    fn set(&self, sid: &str, key: &str, value: String) {
        self.entries.insert((sid.to_string(), key.to_string()), value);
    }
}

/// A session id bound to the store it reads from.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    store: Arc<dyn SessionStore>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(&self.id, key)
    }

    /// Store any displayable value as text.
    pub fn set(&self, key: &str, value: impl ToString) {
        self.store.set(&self.id, key, value.to_string());
    }

    /// Same session, different id. Used for WebSocket messages carrying `sid`.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self::new(id, Arc::clone(&self.store))
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

/// Result of binding a connection to a session.
#[derive(Debug, Clone)]
pub struct BoundSession {
    pub handle: SessionHandle,
    /// True when no cookie was presented and a fresh id was minted.
    pub fresh: bool,
}

impl BoundSession {
    /// `Set-Cookie` value for a freshly minted session.
    pub fn set_cookie(&self, cookie_name: &str) -> Option<HeaderValue> {
        if !self.fresh {
            return None;
        }
        HeaderValue::from_str(&format!(
            "{cookie_name}={}; Path=/; HttpOnly; SameSite=Lax",
            self.handle.id()
        ))
        .ok()
    }
}

/// Bind a connection to the session named by its cookie, or mint a new one.
pub fn bind_session(
    headers: &HeaderMap,
    cookie_name: &str,
    store: &Arc<dyn SessionStore>,
) -> BoundSession {
    match cookie_value(headers, cookie_name) {
        Some(id) => BoundSession {
            handle: SessionHandle::new(id, Arc::clone(store)),
            fresh: false,
        },
        None => BoundSession {
            handle: SessionHandle::new(Uuid::new_v4().to_string(), Arc::clone(store)),
            fresh: true,
        },
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v.to_string())
}
