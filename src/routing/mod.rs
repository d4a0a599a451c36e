//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming HTTP request (raw path)
//!     → router.rs (ordered rule scan)
//!     → matcher.rs (literal or pattern match, path rewrite)
//!     → Return: Forward(target, rewritten path) or Local
//!
//! Rule Compilation (at startup):
//!     [proxy.rules] table (document order)
//!     → Parse each key once (literal | regexp/<source>/<flags>)
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same rule
//! - First match wins (ordered by table position)
//! - WebSocket traffic never consults the router

pub mod matcher;
pub mod router;

pub use matcher::{RouteError, RouteMatcher};
pub use router::{ForwardTarget, RouteDecision, RouteRule, Router};
