//! Rate-limit key derivation.
//!
//! A rate-limit key identifies one quota bucket. It is derived as
//! `scope:identity` when the request carries a valid identity, and as
//! `scope:client-address` otherwise. Two requests with the same effective
//! identity on the same route scope always map to the same key.

use crate::domain::identity::Identity;
use std::fmt;
use std::net::IpAddr;

/// Name of a protected route group, used as the key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteScope(String);

impl RouteScope {
    /// Create a route scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The scope name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a rate-limit key is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeySubject {
    /// A validated token subject.
    Identity(Identity),
    /// The client's network address, used when no valid identity exists.
    Address(IpAddr),
}

impl fmt::Display for KeySubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySubject::Identity(identity) => write!(f, "{}", identity),
            KeySubject::Address(addr) => write!(f, "{}", addr),
        }
    }
}

/// Lookup key into the quota store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    scope: RouteScope,
    subject: KeySubject,
}

impl RateLimitKey {
    /// Create a key for an explicit subject.
    pub fn new(scope: RouteScope, subject: KeySubject) -> Self {
        Self { scope, subject }
    }

    /// Derive the key for a request.
    ///
    /// Identity wins over address. Returns `None` when the request can be
    /// attributed to neither, in which case it must be rejected.
    pub fn derive(
        scope: &RouteScope,
        identity: Option<&Identity>,
        client_addr: Option<IpAddr>,
    ) -> Option<Self> {
        let subject = match (identity, client_addr) {
            (Some(identity), _) => KeySubject::Identity(identity.clone()),
            (None, Some(addr)) => KeySubject::Address(addr),
            (None, None) => return None,
        };

        Some(Self::new(scope.clone(), subject))
    }

    /// The route scope part of the key.
    pub fn scope(&self) -> &RouteScope {
        &self.scope
    }

    /// The attribution part of the key.
    pub fn subject(&self) -> &KeySubject {
        &self.subject
    }

    /// Check if the key is attributed to a client address rather than an identity.
    pub fn is_address_keyed(&self) -> bool {
        matches!(self.subject, KeySubject::Address(_))
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.subject)
    }
}
