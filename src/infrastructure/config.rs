//! Gate configuration.
//!
//! Sources are merged in this order (later sources override earlier):
//! 1. Built-in defaults
//! 2. TOML file, if given and present
//! 3. Environment variables prefixed `QUOTA_GATE_`, with `__` separating
//!    nested keys (e.g. `QUOTA_GATE_QUOTA__LIMIT=500`)
//!
//! Configuration is read once at startup. Only token key material can change
//! afterwards, through [`TokenValidator::reload`].

use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::application::gate::{
    RequestGateBuilder, DEFAULT_QUOTA_LIMIT, DEFAULT_ROUTE_PREFIX, DEFAULT_ROUTE_SCOPE,
    DEFAULT_STORE_TIMEOUT, DEFAULT_WINDOW,
};
use crate::application::ports::{IdentityVerifier, QuotaStore};
use crate::domain::route::ProtectedRoute;
use crate::infrastructure::token::{
    KeyError, KeySet, TokenValidator, TokenValidatorConfig, VerificationKey, DEFAULT_LEEWAY_SECS,
};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "QUOTA_GATE_";

/// Error returned when configuration cannot be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or did not match the schema
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// Neither an HMAC secret nor a public key was configured
    #[error("token verification needs `hmac_secret` or `public_key_pem`")]
    MissingKey,
    /// Both an HMAC secret and a public key were configured
    #[error("set only one of `hmac_secret` and `public_key_pem`")]
    AmbiguousKey,
    /// Key material was rejected
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// One protected route prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix, e.g. `/api/v1`
    pub prefix: String,
    /// Quota scope shared by every path under the prefix
    pub scope: String,
    /// Reject requests without a valid token
    #[serde(default = "default_requires_auth")]
    pub requires_auth: bool,
}

fn default_requires_auth() -> bool {
    true
}

/// Requests allowed per window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Requests allowed per window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUOTA_LIMIT,
            window_secs: DEFAULT_WINDOW.as_secs(),
        }
    }
}

/// Quota store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL; the in-process store is used when absent
    pub url: Option<String>,
    /// Prefix for Redis keys
    pub key_prefix: String,
    /// Bound on one store round trip, in milliseconds
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "quota-gate:".to_string(),
            timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Store failure handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    /// Consecutive store failures still admitted
    pub fail_open_threshold: u32,
    /// Seconds to fail closed before probing the store again
    pub recovery_secs: u64,
}

impl Default for FailureConfig {
    fn default() -> Self {
        let breaker = CircuitBreakerConfig::default();
        Self {
            fail_open_threshold: breaker.fail_open_threshold,
            recovery_secs: breaker.recovery_timeout.as_secs(),
        }
    }
}

/// Token verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Accepted signing algorithm
    pub algorithm: Algorithm,
    /// Shared secret for `HS*` algorithms
    pub hmac_secret: Option<String>,
    /// PEM public key for `RS*`, `PS*` and `ES*` algorithms
    pub public_key_pem: Option<String>,
    /// Seconds of clock skew tolerated on `exp` and `nbf`
    pub leeway_secs: u64,
    /// Required `iss` claim
    pub issuer: Option<String>,
    /// Required `aud` claim
    pub audience: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::HS256,
            hmac_secret: None,
            public_key_pem: None,
            leeway_secs: DEFAULT_LEEWAY_SECS,
            issuer: None,
            audience: None,
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("algorithm", &self.algorithm)
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "<redacted>"))
            .field("public_key_pem", &self.public_key_pem.is_some())
            .field("leeway_secs", &self.leeway_secs)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl TokenConfig {
    /// Build the verification key for the configured algorithm.
    pub fn verification_key(&self) -> Result<VerificationKey, ConfigError> {
        let algorithm = self.algorithm;
        let key = match (&self.hmac_secret, &self.public_key_pem) {
            (Some(secret), None) => VerificationKey::hmac(algorithm, secret.as_bytes())?,
            (None, Some(pem)) => match algorithm {
                Algorithm::ES256 | Algorithm::ES384 => {
                    VerificationKey::ec_pem(algorithm, pem.as_bytes())?
                }
                _ => VerificationKey::rsa_pem(algorithm, pem.as_bytes())?,
            },
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousKey),
            (None, None) => return Err(ConfigError::MissingKey),
        };
        Ok(key)
    }

    /// Build a validator from this configuration.
    pub fn validator(&self) -> Result<TokenValidator, ConfigError> {
        let config = TokenValidatorConfig {
            leeway_secs: self.leeway_secs,
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
        };
        Ok(TokenValidator::new(
            KeySet::single(self.verification_key()?),
            config,
        )?)
    }
}

/// Complete gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Protected route prefixes
    pub routes: Vec<RouteConfig>,
    /// Quota per key
    pub quota: QuotaConfig,
    /// Quota store
    pub store: StoreConfig,
    /// Store failure handling
    pub failure: FailureConfig,
    /// Token verification
    pub token: TokenConfig,
    /// Take the client address from `X-Forwarded-For`
    pub trust_forwarded_for: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            routes: vec![RouteConfig {
                prefix: DEFAULT_ROUTE_PREFIX.to_string(),
                scope: DEFAULT_ROUTE_SCOPE.to_string(),
                requires_auth: true,
            }],
            quota: QuotaConfig::default(),
            store: StoreConfig::default(),
            failure: FailureConfig::default(),
            token: TokenConfig::default(),
            trust_forwarded_for: false,
        }
    }
}

impl GateConfig {
    /// Load from defaults, an optional TOML file and the environment.
    ///
    /// A missing file is skipped.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(GateConfig::default()));

        if let Some(path) = path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
                tracing::info!(path = %path.display(), "loaded gate configuration file");
            } else {
                tracing::warn!(path = %path.display(), "gate configuration file not found, skipping");
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Extract from an already assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Protected routes as domain values.
    pub fn protected_routes(&self) -> Vec<ProtectedRoute> {
        self.routes
            .iter()
            .map(|route| {
                if route.requires_auth {
                    ProtectedRoute::authenticated(&route.prefix, &route.scope)
                } else {
                    ProtectedRoute::public(&route.prefix, &route.scope)
                }
            })
            .collect()
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.quota.window_secs)
    }

    /// Bound on one store round trip.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    /// Circuit breaker settings.
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            fail_open_threshold: self.failure.fail_open_threshold,
            recovery_timeout: Duration::from_secs(self.failure.recovery_secs),
        }
    }

    /// Redis store settings.
    #[cfg(feature = "redis-storage")]
    pub fn redis_store(&self) -> crate::infrastructure::redis_storage::RedisStoreConfig {
        crate::infrastructure::redis_storage::RedisStoreConfig {
            key_prefix: self.store.key_prefix.clone(),
        }
    }

    /// Apply routes, quota, timeouts and failure handling to a gate builder.
    ///
    /// Validation happens in `build()`.
    pub fn apply<S, V>(&self, builder: RequestGateBuilder<S, V>) -> RequestGateBuilder<S, V>
    where
        S: QuotaStore,
        V: IdentityVerifier,
    {
        builder
            .with_routes(self.protected_routes())
            .with_quota(self.quota.limit, self.window())
            .with_store_timeout(self.store_timeout())
            .with_circuit_breaker(self.circuit_breaker())
            .with_trusted_forwarded_for(self.trust_forwarded_for)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::gate::{BuildError, RequestGate};
    use crate::domain::route::RouteTable;
    use crate::infrastructure::mocks::{MockClock, MockVerifier, ScriptedStore};
    use std::sync::Arc;
    use std::time::Instant;

    fn with_toml(toml: &str) -> Result<GateConfig, ConfigError> {
        GateConfig::from_figment(
            Figment::new()
                .merge(Serialized::defaults(GateConfig::default()))
                .merge(Toml::string(toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();

        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].prefix, "/api/v1");
        assert!(config.routes[0].requires_auth);
        assert_eq!(config.quota.limit, 100);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.failure.fail_open_threshold, 5);
        assert_eq!(config.failure.recovery_secs, 30);
        assert_eq!(config.token.algorithm, Algorithm::HS256);
        assert_eq!(config.token.leeway_secs, 0);
    }

    #[test]
    fn test_toml_overrides() {
        let config = with_toml(
            r#"
            trust_forwarded_for = true

            [[routes]]
            prefix = "/api/v2"
            scope = "api-v2"

            [[routes]]
            prefix = "/api/v2/auth"
            scope = "api-v2"
            requires_auth = false

            [quota]
            limit = 10

            [token]
            algorithm = "HS384"
            hmac_secret = "shh"
            issuer = "forum-auth"
            "#,
        )
        .unwrap();

        assert!(config.trust_forwarded_for);
        assert_eq!(config.routes.len(), 2);
        assert!(!config.protected_routes()[1].requires_auth());
        assert_eq!(config.quota.limit, 10);
        // Untouched fields keep their defaults
        assert_eq!(config.quota.window_secs, 60);
        assert_eq!(config.token.algorithm, Algorithm::HS384);
        assert_eq!(config.token.issuer.as_deref(), Some("forum-auth"));
    }

    #[test]
    fn test_demo_config_keeps_auth_routes_public() {
        let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/gateway.toml"));
        let config = GateConfig::from_figment(
            Figment::new()
                .merge(Serialized::defaults(GateConfig::default()))
                .merge(Toml::file(path)),
        )
        .unwrap();

        let routes = RouteTable::new(config.protected_routes()).unwrap();
        assert!(!routes.resolve("/api/v1/auth/login").unwrap().requires_auth());
        assert!(routes.resolve("/api/v1/topics").unwrap().requires_auth());
    }

    #[test]
    fn test_schema_errors() {
        assert!(matches!(
            with_toml("[quota]\nlimit = \"lots\""),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_token_key_selection() {
        let mut token = TokenConfig::default();
        assert!(matches!(token.validator(), Err(ConfigError::MissingKey)));

        token.hmac_secret = Some("shh".to_string());
        assert!(token.validator().is_ok());

        token.public_key_pem = Some("-----BEGIN PUBLIC KEY-----".to_string());
        assert!(matches!(token.validator(), Err(ConfigError::AmbiguousKey)));

        token.hmac_secret = None;
        token.algorithm = Algorithm::RS256;
        assert!(matches!(
            token.validator(),
            Err(ConfigError::Key(KeyError::InvalidKey(_)))
        ));
    }

    #[test]
    fn test_secret_is_redacted() {
        let token = TokenConfig {
            hmac_secret: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", token).contains("hunter2"));
    }

    #[test]
    fn test_apply_feeds_builder_validation() {
        let clock = Arc::new(MockClock::new(Instant::now()));
        let mut config = GateConfig::default();
        config.quota.limit = 0;

        let result = config
            .apply(RequestGate::builder(
                ScriptedStore::new(clock.clone()),
                MockVerifier::new(),
            ))
            .with_clock(clock)
            .build();
        assert!(matches!(result, Err(BuildError::Policy(_))));
    }
}
