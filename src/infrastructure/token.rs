//! Bearer token validation over `jsonwebtoken`.
//!
//! Verifies the signature against the loaded key material, checks expiry
//! against the caller's clock reading, and extracts the `sub` claim as the
//! request identity. Key material lives in a versioned snapshot that can be
//! swapped at runtime; in-flight validations keep the snapshot they started
//! with and never see a half-updated key set.

use crate::application::ports::IdentityVerifier;
use crate::domain::identity::{Identity, InvalidToken};
use arc_swap::ArcSwap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Clock skew tolerated on `exp` and `nbf`, in seconds.
pub const DEFAULT_LEEWAY_SECS: u64 = 0;

/// Error returned when key material cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// HMAC secret is empty
    #[error("hmac secret must not be empty")]
    EmptySecret,
    /// Algorithm does not belong to the key's family
    #[error("algorithm {algorithm:?} cannot be used with {family} keys")]
    AlgorithmMismatch {
        /// Requested algorithm
        algorithm: Algorithm,
        /// Key family
        family: &'static str,
    },
    /// PEM could not be parsed
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// No key was configured
    #[error("no verification key configured")]
    NoKeys,
}

/// One verification key and the algorithm it accepts.
#[derive(Clone)]
pub struct VerificationKey {
    algorithm: Algorithm,
    key: DecodingKey,
}

impl VerificationKey {
    /// Shared-secret key for `HS256`, `HS384` or `HS512`.
    pub fn hmac(algorithm: Algorithm, secret: &[u8]) -> Result<Self, KeyError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(KeyError::AlgorithmMismatch {
                algorithm,
                family: "hmac",
            });
        }
        if secret.is_empty() {
            return Err(KeyError::EmptySecret);
        }
        Ok(Self {
            algorithm,
            key: DecodingKey::from_secret(secret),
        })
    }

    /// RSA public key in PEM form for `RS*` or `PS*` algorithms.
    pub fn rsa_pem(algorithm: Algorithm, pem: &[u8]) -> Result<Self, KeyError> {
        if !matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ) {
            return Err(KeyError::AlgorithmMismatch {
                algorithm,
                family: "rsa",
            });
        }
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { algorithm, key })
    }

    /// EC public key in PEM form for `ES256` or `ES384`.
    pub fn ec_pem(algorithm: Algorithm, pem: &[u8]) -> Result<Self, KeyError> {
        if !matches!(algorithm, Algorithm::ES256 | Algorithm::ES384) {
            return Err(KeyError::AlgorithmMismatch {
                algorithm,
                family: "ec",
            });
        }
        let key = DecodingKey::from_ec_pem(pem).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { algorithm, key })
    }

    /// Algorithm this key verifies.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Keys a validator accepts.
///
/// Tokens carrying a `kid` header are verified with the key registered under
/// that id. Tokens without one use the default key.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    default: Option<VerificationKey>,
    by_kid: HashMap<String, VerificationKey>,
}

impl KeySet {
    /// A set holding only a default key.
    pub fn single(key: VerificationKey) -> Self {
        Self {
            default: Some(key),
            by_kid: HashMap::new(),
        }
    }

    /// Set the key used for tokens without a `kid`.
    pub fn with_default(mut self, key: VerificationKey) -> Self {
        self.default = Some(key);
        self
    }

    /// Register a key under `kid`.
    pub fn with_kid(mut self, kid: impl Into<String>, key: VerificationKey) -> Self {
        self.by_kid.insert(kid.into(), key);
        self
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.by_kid.len() + usize::from(self.default.is_some())
    }

    /// Check if the set holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, kid: Option<&str>) -> Option<&VerificationKey> {
        match kid {
            Some(kid) => self.by_kid.get(kid),
            None => self.default.as_ref(),
        }
    }
}

/// Claim checks applied on top of signature verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenValidatorConfig {
    /// Seconds of clock skew tolerated on `exp` and `nbf`
    pub leeway_secs: u64,
    /// Required `iss` value
    pub issuer: Option<String>,
    /// Required `aud` value
    pub audience: Option<String>,
}

#[derive(Debug)]
struct KeySnapshot {
    version: u64,
    keys: KeySet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SubjectClaim {
    Text(String),
    Number(u64),
}

#[derive(Debug, Clone, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<SubjectClaim>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    nbf: Option<u64>,
}

/// Verifies bearer tokens and extracts the subject as identity.
///
/// Validation has no side effects: the same token at the same evaluation
/// time always yields the same result.
pub struct TokenValidator {
    keys: ArcSwap<KeySnapshot>,
    config: TokenValidatorConfig,
}

impl TokenValidator {
    /// Create a validator.
    ///
    /// # Errors
    /// Returns `KeyError::NoKeys` if `keys` is empty.
    pub fn new(keys: KeySet, config: TokenValidatorConfig) -> Result<Self, KeyError> {
        if keys.is_empty() {
            return Err(KeyError::NoKeys);
        }
        Ok(Self {
            keys: ArcSwap::from_pointee(KeySnapshot { version: 1, keys }),
            config,
        })
    }

    /// Validator for HS256 tokens signed with `secret`, with default claim checks.
    pub fn hs256(secret: &[u8]) -> Result<Self, KeyError> {
        let key = VerificationKey::hmac(Algorithm::HS256, secret)?;
        Self::new(KeySet::single(key), TokenValidatorConfig::default())
    }

    /// Replace the key material. Returns the new snapshot version.
    ///
    /// # Errors
    /// Returns `KeyError::NoKeys` if `keys` is empty; the current keys stay loaded.
    pub fn reload(&self, keys: KeySet) -> Result<u64, KeyError> {
        if keys.is_empty() {
            return Err(KeyError::NoKeys);
        }
        let previous = self.keys.rcu(|current| {
            Arc::new(KeySnapshot {
                version: current.version + 1,
                keys: keys.clone(),
            })
        });
        let version = previous.version + 1;
        tracing::info!(version, keys = keys.len(), "token verification keys reloaded");
        Ok(version)
    }

    /// Version of the loaded key snapshot; starts at 1.
    pub fn key_version(&self) -> u64 {
        self.keys.load().version
    }

    /// Get the claim checks.
    pub fn config(&self) -> &TokenValidatorConfig {
        &self.config
    }

    /// Validate `token` at wall-clock time `now_unix` (seconds).
    pub fn validate(&self, token: &str, now_unix: u64) -> Result<Identity, InvalidToken> {
        let header = decode_header(token).map_err(map_error)?;
        let snapshot = self.keys.load();
        let key = snapshot
            .keys
            .select(header.kid.as_deref())
            .ok_or(InvalidToken::UnknownKey)?;
        if header.alg != key.algorithm {
            return Err(InvalidToken::UnsupportedAlgorithm);
        }

        let data = decode::<Claims>(token, &key.key, &self.validation(key.algorithm))
            .map_err(map_error)?;
        let claims = data.claims;
        let leeway = self.config.leeway_secs;

        let exp = claims
            .exp
            .ok_or_else(|| InvalidToken::ClaimMismatch("missing `exp`".to_string()))?;
        if exp.saturating_add(leeway) <= now_unix {
            return Err(InvalidToken::Expired);
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now_unix.saturating_add(leeway) {
                return Err(InvalidToken::NotYetValid);
            }
        }

        let subject = match claims.sub {
            Some(SubjectClaim::Text(text)) => text,
            Some(SubjectClaim::Number(number)) => number.to_string(),
            None => return Err(InvalidToken::MissingSubject),
        };
        Identity::new(subject).ok_or(InvalidToken::MissingSubject)
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        // Expiry is checked against the caller's clock, not the system clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = self.config.leeway_secs;
        validation.set_required_spec_claims(&["exp"]);
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.keys.load();
        f.debug_struct("TokenValidator")
            .field("key_version", &snapshot.version)
            .field("keys", &snapshot.keys.len())
            .field("config", &self.config)
            .finish()
    }
}

impl IdentityVerifier for TokenValidator {
    fn verify(&self, token: &str, now_unix: u64) -> Result<Identity, InvalidToken> {
        self.validate(token, now_unix)
    }
}

fn map_error(error: jsonwebtoken::errors::Error) -> InvalidToken {
    match error.kind() {
        ErrorKind::InvalidSignature => InvalidToken::BadSignature,
        ErrorKind::InvalidAlgorithm => InvalidToken::UnsupportedAlgorithm,
        ErrorKind::ExpiredSignature => InvalidToken::Expired,
        ErrorKind::ImmatureSignature => InvalidToken::NotYetValid,
        ErrorKind::InvalidIssuer => InvalidToken::ClaimMismatch("iss".to_string()),
        ErrorKind::InvalidAudience => InvalidToken::ClaimMismatch("aud".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            InvalidToken::ClaimMismatch(format!("missing `{}`", claim))
        }
        _ => InvalidToken::Malformed(error.to_string()),
    }
}
