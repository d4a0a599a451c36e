//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind host, TLS, HTTP/2).
    pub listener: ListenerConfig,

    /// WebSocket server settings.
    pub websocket: WebSocketConfig,

    /// Reverse-proxy engine settings and rule table.
    pub proxy: ProxyConfig,

    /// Session cookie settings.
    pub session: SessionConfig,

    /// Body size and timeout limits.
    pub limits: LimitsConfig,

    /// Multipart upload settings.
    pub uploads: UploadConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Default port, used when `run` is not given an explicit one.
    pub port: u16,

    /// Advertise HTTP/2 over ALPN when TLS is enabled.
    pub http2: bool,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Grace period for in-flight requests on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            http2: true,
            tls: None,
            shutdown_grace_secs: 5,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// WebSocket server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Accept WebSocket upgrades.
    pub enabled: bool,

    /// Path the upgrade must target.
    pub path: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/".to_string(),
        }
    }
}

/// Reverse-proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Construct the proxy engine at all.
    pub enabled: bool,

    /// Upstream request timeout in seconds.
    pub timeout_secs: u64,

    /// Ordered rule table. Document order is match priority.
    pub rules: ProxyRules,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            rules: ProxyRules::default(),
        }
    }
}

/// A rule value: either a bare upstream URL or a full options record.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProxyTarget {
    Url(String),
    Options(ProxyOptions),
}

impl ProxyTarget {
    /// Resolve to an options record; a bare string becomes `{ target = value }`.
    pub fn into_options(self) -> ProxyOptions {
        match self {
            ProxyTarget::Url(target) => ProxyOptions {
                target,
                ..ProxyOptions::default()
            },
            ProxyTarget::Options(options) => options,
        }
    }
}

/// Options attached to a proxy rule.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProxyOptions {
    /// Upstream base URL (e.g., "http://upstream:9000").
    pub target: String,

    /// Rewrite the Host header to the upstream authority.
    #[serde(default)]
    pub change_origin: bool,

    /// Extra headers added to every forwarded request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Insertion-ordered mapping from rule key to target.
///
/// Deserialized from a TOML table; order is preserved because `toml` is built
/// with `preserve_order`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyRules(Vec<(String, ProxyTarget)>);

impl ProxyRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule at the lowest priority. An existing key is replaced in place.
    pub fn insert(&mut self, key: impl Into<String>, target: ProxyTarget) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = target,
            None => self.0.push((key, target)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProxyTarget)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ProxyTarget)> for ProxyRules {
    fn from_iter<I: IntoIterator<Item = (K, ProxyTarget)>>(iter: I) -> Self {
        let mut rules = ProxyRules::new();
        for (k, v) in iter {
            rules.insert(k, v);
        }
        rules
    }
}

impl Serialize for ProxyRules {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProxyRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = ProxyRules;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of proxy rules")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut rules = ProxyRules::new();
                while let Some((key, value)) = access.next_entry::<String, ProxyTarget>()? {
                    rules.insert(key, value);
                }
                Ok(rules)
            }
        }

        deserializer.deserialize_map(RulesVisitor)
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie carrying the session id.
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "gateway.sid".to_string(),
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes (JSON and multipart).
    pub max_body_size: usize,

    /// Time allowed to receive a full request body, in seconds.
    pub body_timeout_secs: u64,

    /// Time allowed for the processor to answer, in seconds.
    pub response_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
            body_timeout_secs: 30,
            response_timeout_secs: 120,
        }
    }
}

/// Multipart upload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory uploaded files are written to.
    pub temp_dir: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_keep_document_order() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [proxy.rules]
            "/zeta" = "http://z:1"
            "/alpha" = { target = "http://a:1", change_origin = true }
            "regexp/^\\/m/i" = "http://m:1"
            "#,
        )
        .unwrap();

        let keys: Vec<&str> = config.proxy.rules.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["/zeta", "/alpha", "regexp/^\\/m/i"]);

        let (_, alpha) = config.proxy.rules.iter().nth(1).unwrap();
        let options = alpha.clone().into_options();
        assert_eq!(options.target, "http://a:1");
        assert!(options.change_origin);
    }

    #[test]
    fn bare_string_becomes_target() {
        let options = ProxyTarget::Url("http://upstream:9000".into()).into_options();
        assert_eq!(options.target, "http://upstream:9000");
        assert!(!options.change_origin);
        assert!(options.headers.is_empty());
    }

    #[test]
    fn defaults_apply_to_empty_file() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.port, 8000);
        assert!(config.websocket.enabled);
        assert!(config.proxy.rules.is_empty());
        assert_eq!(config.limits.max_body_size, 10 * 1024 * 1024);
    }
}
