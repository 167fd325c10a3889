//! Protected route matching.
//!
//! The gate only evaluates requests whose path falls under a configured
//! prefix. Matching is segment-aware (`/api/v1` covers `/api/v1/topics` but
//! not `/api/v10`) and the longest matching prefix wins, so a public
//! sub-prefix can relax authentication inside a protected group.

use crate::domain::key::RouteScope;
use thiserror::Error;

/// Error returned when a route table is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Prefixes must be absolute paths.
    #[error("route prefix `{0}` must start with '/'")]
    RelativePrefix(String),
    /// The same prefix was registered twice.
    #[error("route prefix `{0}` is registered more than once")]
    DuplicatePrefix(String),
    /// Scope names become key prefixes and cannot be empty.
    #[error("route prefix `{0}` has an empty scope name")]
    EmptyScope(String),
}

/// One protected route group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRoute {
    prefix: String,
    scope: RouteScope,
    requires_auth: bool,
}

impl ProtectedRoute {
    /// Create a route that requires a valid bearer token.
    pub fn authenticated(prefix: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            prefix: normalize(prefix.into()),
            scope: RouteScope::new(scope),
            requires_auth: true,
        }
    }

    /// Create a route that is rate limited but accepts anonymous callers.
    pub fn public(prefix: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            requires_auth: false,
            ..Self::authenticated(prefix, scope)
        }
    }

    /// The path prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The scope used in rate-limit keys.
    pub fn scope(&self) -> &RouteScope {
        &self.scope
    }

    /// Whether an invalid or missing token rejects the request.
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Set of protected route groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    // Sorted by descending prefix length so the first match is the longest.
    routes: Vec<ProtectedRoute>,
}

impl RouteTable {
    /// Build a route table, validating every entry.
    pub fn new(routes: Vec<ProtectedRoute>) -> Result<Self, RouteError> {
        let mut seen = std::collections::BTreeSet::new();
        for route in &routes {
            if !route.prefix.starts_with('/') {
                return Err(RouteError::RelativePrefix(route.prefix.clone()));
            }
            if route.scope.as_str().trim().is_empty() {
                return Err(RouteError::EmptyScope(route.prefix.clone()));
            }
            if !seen.insert(route.prefix.clone()) {
                return Err(RouteError::DuplicatePrefix(route.prefix.clone()));
            }
        }

        let mut routes = routes;
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    /// Find the protected route covering `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&ProtectedRoute> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Number of registered route groups.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no route is protected.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn normalize(prefix: String) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() && prefix.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
