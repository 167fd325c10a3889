//! Request identity extracted from a validated bearer token.
//!
//! An identity lives only for the duration of one request. It is used as the
//! rate-limit attribution key and handed to downstream handlers for their own
//! authorization checks.

use std::fmt;
use thiserror::Error;

/// Stable subject handle taken from a validated token's `sub` claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from a subject value.
    ///
    /// Returns `None` for empty or whitespace-only subjects, which cannot
    /// attribute a request to anyone.
    pub fn new(subject: impl Into<String>) -> Option<Self> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            None
        } else {
            Some(Self(subject))
        }
    }

    /// The raw subject value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity resolved for an admitted request.
///
/// Downstream handlers receive this value and must not re-validate the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIdentity {
    /// The request carried a valid token.
    Identified(Identity),
    /// No valid token; only possible on routes that do not require authentication.
    Anonymous,
}

impl RequestIdentity {
    /// The identity, if the request was authenticated.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            RequestIdentity::Identified(identity) => Some(identity),
            RequestIdentity::Anonymous => None,
        }
    }

    /// Check if this is the anonymous marker.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, RequestIdentity::Anonymous)
    }
}

/// Reasons a bearer token fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidToken {
    /// No bearer token was presented.
    #[error("missing bearer token")]
    Missing,
    /// The token could not be decoded.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// The signature does not verify against the configured key material.
    #[error("token signature does not verify")]
    BadSignature,
    /// The token was signed with an algorithm that is not accepted.
    #[error("token algorithm is not accepted")]
    UnsupportedAlgorithm,
    /// The token names a key id that is not loaded.
    #[error("token references an unknown signing key")]
    UnknownKey,
    /// The expiry timestamp is at or before the evaluation time.
    #[error("token expired")]
    Expired,
    /// The `nbf` claim lies in the future.
    #[error("token is not valid yet")]
    NotYetValid,
    /// Issuer or audience did not match the configured values.
    #[error("token claim mismatch: {0}")]
    ClaimMismatch(String),
    /// The subject claim is absent or empty.
    #[error("token has no usable subject")]
    MissingSubject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_blank_subject() {
        assert!(Identity::new("").is_none());
        assert!(Identity::new("   ").is_none());
        assert_eq!(Identity::new("42").unwrap().as_str(), "42");
    }

    #[test]
    fn test_request_identity_accessors() {
        let id = Identity::new("alice").unwrap();
        let identified = RequestIdentity::Identified(id.clone());

        assert_eq!(identified.identity(), Some(&id));
        assert!(!identified.is_anonymous());
        assert!(RequestIdentity::Anonymous.is_anonymous());
        assert_eq!(RequestIdentity::Anonymous.identity(), None);
    }
}
