//! Route key parsing and path matching.
//!
//! # Responsibilities
//! - Parse a rule key once into a literal or compiled-pattern matcher
//! - Match a decoded request path against it
//! - Compute the rewritten (forwarded) path
//!
//! # Design Decisions
//! - Literal keys are compared with leading/trailing slashes trimmed
//! - Literal matches respect segment boundaries (`/old` does not match `/older`)
//! - Pattern keys use `regexp/<source>/<flags>`; the source may itself contain `/`

use regex::{Regex, RegexBuilder};
use thiserror::Error;

const PATTERN_PREFIX: &str = "regexp/";

/// Error raised when a rule key cannot be parsed.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("pattern key {0:?} is missing its closing '/'")]
    UnterminatedPattern(String),

    #[error("unsupported regexp flag {flag:?} in {key:?}")]
    UnsupportedFlag { key: String, flag: char },

    #[error("invalid regexp in {key:?}: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },
}

/// A parsed route key.
#[derive(Debug, Clone)]
pub enum RouteMatcher {
    /// Literal path, stored without leading/trailing slashes.
    Literal(String),
    /// Compiled regular expression.
    Pattern(Regex),
}

impl RouteMatcher {
    /// Parse a rule key.
    pub fn parse(key: &str) -> Result<Self, RouteError> {
        match key.strip_prefix(PATTERN_PREFIX) {
            Some(rest) => Self::parse_pattern(key, rest),
            None => Ok(RouteMatcher::Literal(key.trim_matches('/').to_string())),
        }
    }

    fn parse_pattern(key: &str, rest: &str) -> Result<Self, RouteError> {
        let split = rest
            .rfind('/')
            .ok_or_else(|| RouteError::UnterminatedPattern(key.to_string()))?;
        let (source, flags) = (&rest[..split], &rest[split + 1..]);

        let mut builder = RegexBuilder::new(source);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                // Global, unicode and sticky have no meaning for a single match.
                'g' | 'u' | 'y' => {}
                other => {
                    return Err(RouteError::UnsupportedFlag {
                        key: key.to_string(),
                        flag: other,
                    })
                }
            }
        }

        builder
            .build()
            .map(RouteMatcher::Pattern)
            .map_err(|source| RouteError::InvalidPattern {
                key: key.to_string(),
                source,
            })
    }

    /// Match `path` and return the forwarded path, or `None` if it does not match.
    pub fn rewrite(&self, path: &str) -> Option<String> {
        match self {
            RouteMatcher::Literal(literal) => {
                let relative = path.trim_start_matches('/');
                let rest = relative.strip_prefix(literal.as_str())?;
                if !(rest.is_empty() || rest.starts_with('/') || literal.is_empty()) {
                    return None;
                }
                Some(normalize(rest))
            }
            RouteMatcher::Pattern(regex) => {
                let found = regex.find(path)?;
                let mut rest = String::with_capacity(path.len() - found.len());
                rest.push_str(&path[..found.start()]);
                rest.push_str(&path[found.end()..]);
                Some(normalize(&rest))
            }
        }
    }

    /// Returns true if the path matches this rule.
    pub fn matches(&self, path: &str) -> bool {
        self.rewrite(path).is_some()
    }
}

fn normalize(rest: &str) -> String {
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_matcher() {
        let matcher = RouteMatcher::parse("/old").unwrap();

        assert_eq!(matcher.rewrite("/old/sub").as_deref(), Some("/sub"));
        assert_eq!(matcher.rewrite("/old").as_deref(), Some("/"));
        assert_eq!(matcher.rewrite("/old/").as_deref(), Some("/"));
        assert!(!matcher.matches("/older"));
        assert!(!matcher.matches("/new/old"));
    }

    #[test]
    fn test_literal_slashes_ignored() {
        for key in ["old", "/old", "old/", "//old//"] {
            let matcher = RouteMatcher::parse(key).unwrap();
            assert_eq!(matcher.rewrite("/old/a/b").as_deref(), Some("/a/b"), "key {key}");
        }
    }

    #[test]
    fn test_nested_literal() {
        let matcher = RouteMatcher::parse("/apps/calendar").unwrap();
        assert_eq!(matcher.rewrite("/apps/calendar/events?x").as_deref(), Some("/events?x"));
        assert!(!matcher.matches("/apps"));
    }

    #[test]
    fn test_pattern_matcher() {
        let matcher = RouteMatcher::parse(r"regexp/^\/api\/v\d+/").unwrap();

        assert_eq!(matcher.rewrite("/api/v2/users").as_deref(), Some("/users"));
        assert_eq!(matcher.rewrite("/api/v10").as_deref(), Some("/"));
        assert!(!matcher.matches("/api/vx"));
    }

    #[test]
    fn test_pattern_removes_only_matched_substring() {
        let matcher = RouteMatcher::parse("regexp/legacy-/").unwrap();
        assert_eq!(matcher.rewrite("/x/legacy-thing").as_deref(), Some("/x/thing"));

        let matcher = RouteMatcher::parse("regexp/^\\/proxy//").unwrap();
        assert_eq!(matcher.rewrite("/proxy/abc").as_deref(), Some("/abc"));
    }

    #[test]
    fn test_pattern_flags() {
        let matcher = RouteMatcher::parse("regexp/^\\/media/i").unwrap();
        assert_eq!(matcher.rewrite("/MEDIA/a.png").as_deref(), Some("/a.png"));

        let matcher = RouteMatcher::parse("regexp/^\\/media/g").unwrap();
        assert!(!matcher.matches("/MEDIA/a.png"));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            RouteMatcher::parse("regexp/abc"),
            Err(RouteError::UnterminatedPattern(_))
        ));
        assert!(matches!(
            RouteMatcher::parse("regexp/abc/q"),
            Err(RouteError::UnsupportedFlag { flag: 'q', .. })
        ));
        assert!(matches!(
            RouteMatcher::parse("regexp/(unclosed/"),
            Err(RouteError::InvalidPattern { .. })
        ));
    }
}
