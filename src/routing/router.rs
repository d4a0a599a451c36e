//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled rules in configuration order
//! - Decide forward-or-handle-locally for a request path
//! - Build the upstream URL for a forwarded request
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in table order, first match wins
//! - Explicit `Local` decision rather than a silent default target

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::config::{ProxyOptions, ProxyRules};
use crate::routing::matcher::{RouteError, RouteMatcher};

/// Bytes re-encoded when a decoded path goes back on the wire. `/` is kept.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One compiled entry of the rule table.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub key: String,
    pub matcher: RouteMatcher,
    pub options: ProxyOptions,
}

/// A resolved forwarding decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardTarget {
    /// Key of the rule that matched.
    pub rule: String,
    /// Options of the rule that matched.
    pub options: ProxyOptions,
    /// Decoded path with the matched portion removed.
    pub path: String,
}

impl ForwardTarget {
    /// Full upstream URL: target + rewritten path + original query.
    pub fn upstream_url(&self, query: Option<&str>) -> String {
        let base = self.options.target.trim_end_matches('/');
        let path = utf8_percent_encode(&self.path, PATH_SEGMENT);
        match query {
            Some(q) if !q.is_empty() => format!("{base}{path}?{q}"),
            _ => format!("{base}{path}"),
        }
    }
}

/// Outcome of matching a path against the rule table.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// No rule matched; normalize and process locally.
    Local,
    /// Stream the request verbatim to the upstream.
    Forward(ForwardTarget),
}

/// Compiled, ordered rule table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    rules: Vec<RouteRule>,
}

impl Router {
    /// Compile the rule table. Every key is parsed exactly once here.
    pub fn from_config(rules: &ProxyRules) -> Result<Self, RouteError> {
        let rules = rules
            .iter()
            .map(|(key, target)| {
                Ok(RouteRule {
                    key: key.to_string(),
                    matcher: RouteMatcher::parse(key)?,
                    options: target.clone().into_options(),
                })
            })
            .collect::<Result<Vec<_>, RouteError>>()?;

        tracing::debug!(rule_count = rules.len(), "Proxy rules compiled");
        Ok(Self { rules })
    }

    /// Match a decoded request path (no query string).
    pub fn match_path(&self, path: &str) -> RouteDecision {
        self.rules
            .iter()
            .find_map(|rule| {
                rule.matcher.rewrite(path).map(|rewritten| ForwardTarget {
                    rule: rule.key.clone(),
                    options: rule.options.clone(),
                    path: rewritten,
                })
            })
            .map_or(RouteDecision::Local, RouteDecision::Forward)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
