//! Segment-trie request router.
//!
//! One trie per HTTP method, O(segments) lookup for the usual route shapes.
//! Patterns use `:name` to capture one segment and a trailing `*name` to
//! capture the rest of the path, slashes included.
//!
//! Precedence at every depth is static, then named, then wildcard. Ambiguous
//! registrations are refused at insert time rather than resolved per request:
//!
//! ```rust
//! use http::Method;
//! use switchyard::router::Router;
//!
//! let mut router = Router::new();
//! router.insert(Method::GET, "/users/list", "list").unwrap();
//! router.insert(Method::GET, "/users/:id", "show").unwrap();
//! assert!(router.insert(Method::GET, "/users/:name/posts", "posts").is_err());
//!
//! let m = router.at(&Method::GET, "/users/42").unwrap();
//! assert_eq!(*m.value, "show");
//! assert_eq!(m.params.get("id"), Some("42"));
//! ```

mod node;
mod path;

pub use path::normalize;
pub(crate) use path::join;

use std::collections::HashMap;
use std::fmt;

use http::Method;

use crate::params::Params;
use node::Node;

/// The kind of ambiguity that made a registration fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// Two named parameters with different names at the same depth.
    NamedParam,
    /// A wildcard next to a named sibling, or two differently named wildcards.
    Wildcard,
    /// The same pattern is already registered for this method.
    Duplicate,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NamedParam => "conflicting parameter names at the same position",
            Self::Wildcard => "wildcard would be shadowed by a sibling parameter",
            Self::Duplicate => "route already registered",
        })
    }
}

/// A pattern was ambiguous with one already in the trie.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("route `{method} {pattern}` conflicts with `{existing}`: {kind}")]
pub struct RouteConflictError {
    pub method: Method,
    pub pattern: String,
    pub existing: String,
    pub kind: ConflictKind,
}

/// Registration failure. Always a setup-time error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Conflict(#[from] RouteConflictError),

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("route `{method} {pattern}` has no handlers")]
    EmptyChain { method: Method, pattern: String },
}

/// A successful lookup.
#[derive(Debug)]
pub struct Match<'r, T> {
    pub value: &'r T,
    pub params: Params,
}

/// Per-method segment tries mapping patterns to values of type `T`.
///
/// Build it once, then share it read-only; lookups take `&self` and need no
/// locking.
pub struct Router<T> {
    trees: HashMap<Method, Node<T>>,
    len: usize,
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self { trees: HashMap::new(), len: 0 }
    }

    /// Registers `value` for `method` and `pattern`.
    ///
    /// The pattern is normalized first, so `/a//b/` and `/a/b` are the same
    /// route.
    pub fn insert(&mut self, method: Method, pattern: &str, value: T) -> Result<(), RouteError> {
        let pattern = normalize(pattern);
        let segments = path::parse(&pattern).map_err(|reason| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })?;

        self.trees
            .entry(method.clone())
            .or_insert_with(Node::new)
            .insert(&segments, &pattern, value)
            .map_err(|c| RouteConflictError {
                method,
                pattern: pattern.to_string(),
                existing: c.existing,
                kind: c.kind,
            })?;

        self.len += 1;
        Ok(())
    }

    /// Resolves `path` to a value and its captured parameters.
    pub fn at(&self, method: &Method, path: &str) -> Option<Match<'_, T>> {
        let mut params = Params::new();
        let value = self.find(method, path, &mut params)?;
        Some(Match { value, params })
    }

    /// Like [`Router::at`], but appends captures to a caller-owned list so a
    /// pooled [`Params`] can be reused across requests.
    ///
    /// `params` is left untouched when nothing matches.
    pub fn find<'r>(&'r self, method: &Method, path: &str, params: &mut Params) -> Option<&'r T> {
        let tree = self.trees.get(method)?;
        let path = normalize(path);
        tree.find(&path[1..], params)
    }

    /// Number of registered routes across all methods.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}
