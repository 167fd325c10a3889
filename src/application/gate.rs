//! Request admission pipeline.
//!
//! Every request to a protected route runs through the same ordered steps:
//!
//! 1. **Identify**: verify the bearer token. A missing or invalid token does
//!    not abort the request; it is remembered so the route's auth
//!    requirement can be enforced after counting.
//! 2. **Derive key**: `scope:identity`, or `scope:client-address` without a
//!    valid identity. A request attributable to neither is rejected.
//! 3. **Count**: atomic increment in the quota store, guarded by the circuit
//!    breaker and a per-call timeout.
//! 4. **Decide**: quota first, then authentication.
//!
//! The gate holds no per-request locks and never does read-then-write
//! arithmetic on shared counters; the store's increment is the only
//! coordination point.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, FailureVerdict};
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, IdentityVerifier, QuotaStore, StoreError};
use crate::domain::identity::{Identity, InvalidToken, RequestIdentity};
use crate::domain::key::RateLimitKey;
use crate::domain::policy::{ceil_secs, AdmissionDecision, PolicyError, QuotaPolicy, WindowCount};
use crate::domain::route::{ProtectedRoute, RouteError, RouteTable};
use crate::infrastructure::clock::SystemClock;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default requests allowed per window.
pub const DEFAULT_QUOTA_LIMIT: u64 = 100;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default bound on one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);
/// Default protected prefix.
pub const DEFAULT_ROUTE_PREFIX: &str = "/api/v1";
/// Default scope for the default prefix.
pub const DEFAULT_ROUTE_SCOPE: &str = "api-v1";

/// Inbound request as seen by the gate.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    /// Request path
    pub path: &'a str,
    /// Raw `Authorization` header value
    pub authorization: Option<&'a str>,
    /// Client network address, if known
    pub client_addr: Option<IpAddr>,
}

impl<'a> GateRequest<'a> {
    /// Create a request for `path` with no credentials and no address.
    pub fn new(path: &'a str) -> Self {
        Self {
            path,
            authorization: None,
            client_addr: None,
        }
    }

    /// Attach the raw `Authorization` header value.
    pub fn with_authorization(mut self, value: &'a str) -> Self {
        self.authorization = Some(value);
        self
    }

    /// Attach the client address.
    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }
}

/// Quota state reported with an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Requests allowed per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Seconds until the window resets
    pub reset_after: u64,
}

/// An admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Identity handed to downstream handlers
    pub identity: RequestIdentity,
    /// Key the request was counted under
    pub key: RateLimitKey,
    /// Quota state, absent when admitted while the store was unavailable
    pub quota: Option<QuotaStatus>,
}

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Route requires authentication and the token was missing or invalid
    #[error("authentication required: {0}")]
    Unauthenticated(InvalidToken),
    /// Quota for the current window is exhausted
    #[error("request quota exceeded, retry after {retry_after}s")]
    QuotaExceeded {
        /// Seconds until the window resets
        retry_after: u64,
    },
    /// Store failure budget exhausted; failing closed
    #[error("request quota unavailable, retry after {retry_after}s")]
    StoreUnavailable {
        /// Seconds until the store is probed again
        retry_after: u64,
    },
    /// Store refused the operation
    #[error("request quota could not be verified, retry after {retry_after}s")]
    StoreFault {
        /// Seconds to wait before retrying
        retry_after: u64,
    },
    /// No identity and no client address
    #[error("request cannot be attributed to a client")]
    Unattributable,
}

impl Rejection {
    /// HTTP status code for this rejection.
    pub fn status(&self) -> u16 {
        match self {
            Rejection::Unauthenticated(_) => 401,
            Rejection::QuotaExceeded { .. }
            | Rejection::StoreUnavailable { .. }
            | Rejection::StoreFault { .. } => 429,
            Rejection::Unattributable => 400,
        }
    }

    /// Seconds the caller should wait, for quota-side rejections.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Rejection::QuotaExceeded { retry_after }
            | Rejection::StoreUnavailable { retry_after }
            | Rejection::StoreFault { retry_after } => Some(*retry_after),
            Rejection::Unauthenticated(_) | Rejection::Unattributable => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::Unauthenticated(_) => "unauthenticated",
            Rejection::QuotaExceeded { .. } => "quota_exceeded",
            Rejection::StoreUnavailable { .. } => "quota_unavailable",
            Rejection::StoreFault { .. } => "quota_fault",
            Rejection::Unattributable => "unattributable",
        }
    }
}

/// Result of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Path is not protected; pass through untouched
    Bypass,
    /// Forward downstream
    Forward(Admission),
    /// Short-circuit with a rejection
    Reject(Rejection),
}

impl GateOutcome {
    /// Check if the request may proceed (forwarded or bypassed).
    pub fn is_admitted(&self) -> bool {
        !matches!(self, GateOutcome::Reject(_))
    }

    /// The rejection, if any.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            GateOutcome::Reject(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Error returned when building a `RequestGate` fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Quota parameters are invalid
    #[error("invalid quota policy: {0}")]
    Policy(#[from] PolicyError),
    /// Route table is invalid
    #[error("invalid route table: {0}")]
    Routes(#[from] RouteError),
    /// The gate would protect nothing
    #[error("at least one protected route is required")]
    NoRoutes,
    /// Store calls need a positive timeout
    #[error("store timeout must be greater than 0")]
    ZeroStoreTimeout,
}

/// Builder for constructing a `RequestGate`.
#[derive(Debug)]
pub struct RequestGateBuilder<S, V> {
    store: S,
    verifier: V,
    routes: Vec<ProtectedRoute>,
    limit: u64,
    window: Duration,
    store_timeout: Duration,
    circuit: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    trust_forwarded_for: bool,
}

impl<S, V> RequestGateBuilder<S, V>
where
    S: QuotaStore,
    V: IdentityVerifier,
{
    /// Replace the protected routes.
    pub fn with_routes(mut self, routes: Vec<ProtectedRoute>) -> Self {
        self.routes = routes;
        self
    }

    /// Set the quota: `limit` requests per `window`.
    pub fn with_quota(mut self, limit: u64, window: Duration) -> Self {
        self.limit = limit;
        self.window = window;
        self
    }

    /// Set the bound on one store round trip.
    ///
    /// A store call that does not answer in time counts as unavailable.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the fail-open budget and recovery timeout.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit = config;
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Trust the first `X-Forwarded-For` entry as the client address.
    ///
    /// Only enable this behind a proxy that overwrites the header.
    pub fn with_trusted_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Build the gate.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration is invalid.
    pub fn build(self) -> Result<RequestGate<S, V>, BuildError> {
        if self.routes.is_empty() {
            return Err(BuildError::NoRoutes);
        }
        if self.store_timeout.is_zero() {
            return Err(BuildError::ZeroStoreTimeout);
        }
        let policy = QuotaPolicy::new(self.limit, self.window)?;
        let routes = RouteTable::new(self.routes)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let breaker = CircuitBreaker::new(self.circuit, Arc::clone(&clock));

        Ok(RequestGate {
            store: self.store,
            verifier: self.verifier,
            routes,
            policy,
            store_timeout: self.store_timeout,
            breaker,
            metrics: Metrics::new(),
            clock,
            trust_forwarded_for: self.trust_forwarded_for,
        })
    }
}

/// Authenticates requests and enforces the per-identity quota.
#[derive(Debug)]
pub struct RequestGate<S, V> {
    store: S,
    verifier: V,
    routes: RouteTable,
    policy: QuotaPolicy,
    store_timeout: Duration,
    breaker: CircuitBreaker,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    trust_forwarded_for: bool,
}

impl<S, V> RequestGate<S, V>
where
    S: QuotaStore,
    V: IdentityVerifier,
{
    /// Start building a gate around a quota store and a token verifier.
    pub fn builder(store: S, verifier: V) -> RequestGateBuilder<S, V> {
        RequestGateBuilder {
            store,
            verifier,
            routes: vec![ProtectedRoute::authenticated(
                DEFAULT_ROUTE_PREFIX,
                DEFAULT_ROUTE_SCOPE,
            )],
            limit: DEFAULT_QUOTA_LIMIT,
            window: DEFAULT_WINDOW,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            circuit: CircuitBreakerConfig::default(),
            clock: None,
            trust_forwarded_for: false,
        }
    }

    /// Evaluate one request.
    ///
    /// Never fails: every path ends in a bypass, a forward, or a rejection.
    ///
    /// A missing or invalid token does not short-circuit. The request is
    /// still counted under the client-address key, and the quota verdict
    /// is checked first: once that bucket is exhausted the answer is
    /// [`Rejection::QuotaExceeded`] (429), not
    /// [`Rejection::Unauthenticated`] (401). Token guessing from one address
    /// is throttled like any other traffic.
    pub async fn evaluate(&self, request: &GateRequest<'_>) -> GateOutcome {
        let Some(route) = self.routes.resolve(request.path) else {
            return GateOutcome::Bypass;
        };

        let verified = self.identify(request.authorization);
        let (identity, auth_failure) = match verified {
            Ok(identity) => (Some(identity), None),
            Err(reason) => {
                tracing::debug!(
                    path = request.path,
                    reason = %reason,
                    "token not accepted, keying request by client address"
                );
                (None, Some(reason))
            }
        };

        let Some(key) = RateLimitKey::derive(route.scope(), identity.as_ref(), request.client_addr)
        else {
            self.metrics.record_unattributable();
            tracing::debug!(
                path = request.path,
                "rejecting request with no identity and no client address"
            );
            return GateOutcome::Reject(Rejection::Unattributable);
        };

        let counted = match self.count(&key).await {
            Ok(counted) => counted,
            Err(rejection) => return GateOutcome::Reject(rejection),
        };

        if let Some(window) = &counted {
            if let AdmissionDecision::RejectWithRetryAfter(retry_after) =
                self.policy.evaluate(window)
            {
                self.metrics.record_quota_rejection();
                tracing::debug!(
                    key = %key,
                    count = window.count,
                    limit = self.policy.limit(),
                    retry_after,
                    "quota exceeded"
                );
                return GateOutcome::Reject(Rejection::QuotaExceeded { retry_after });
            }
        }

        if route.requires_auth() {
            if let Some(reason) = auth_failure {
                self.metrics.record_auth_rejection();
                return GateOutcome::Reject(Rejection::Unauthenticated(reason));
            }
        }

        self.metrics.record_admitted();
        let quota = counted.map(|window| QuotaStatus {
            limit: self.policy.limit(),
            remaining: self.policy.remaining(&window),
            reset_after: self.policy.retry_after(window.ttl),
        });
        tracing::trace!(key = %key, ?quota, "request admitted");

        GateOutcome::Forward(Admission {
            identity: identity.map_or(RequestIdentity::Anonymous, RequestIdentity::Identified),
            key,
            quota,
        })
    }

    fn identify(&self, authorization: Option<&str>) -> Result<Identity, InvalidToken> {
        let token = bearer_token(authorization)?;
        let now = self.clock.unix_now().as_secs();
        self.verifier.verify(token, now)
    }

    /// Increment the window counter for `key`.
    ///
    /// Returns `Ok(None)` when the store is unavailable but the failure
    /// budget allows admitting without a count.
    async fn count(&self, key: &RateLimitKey) -> Result<Option<WindowCount>, Rejection> {
        if !self.breaker.allow_request() {
            self.metrics.record_fail_closed();
            let retry_after = ceil_secs(self.breaker.retry_after()).max(1);
            tracing::debug!(key = %key, retry_after, "quota store circuit open, failing closed");
            return Err(Rejection::StoreUnavailable { retry_after });
        }

        let increment = self.store.increment(key, self.policy.window());
        let result = match tokio::time::timeout(self.store_timeout, increment).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "no answer within {}ms",
                self.store_timeout.as_millis()
            ))),
        };

        match result {
            Ok(window) => {
                self.breaker.record_success();
                Ok(Some(window))
            }
            Err(StoreError::Unavailable(reason)) => match self.breaker.record_failure() {
                FailureVerdict::FailOpen { consecutive } => {
                    self.metrics.record_fail_open();
                    tracing::warn!(
                        key = %key,
                        error = %reason,
                        consecutive_failures = consecutive,
                        "quota store unavailable, admitting without count"
                    );
                    Ok(None)
                }
                FailureVerdict::FailClosed { consecutive } => {
                    self.metrics.record_fail_closed();
                    let retry_after = ceil_secs(self.breaker.retry_after()).max(1);
                    tracing::error!(
                        key = %key,
                        error = %reason,
                        consecutive_failures = consecutive,
                        retry_after,
                        "quota store unavailable, failing closed"
                    );
                    Err(Rejection::StoreUnavailable { retry_after })
                }
            },
            Err(StoreError::Protocol(reason)) => {
                self.metrics.record_store_fault();
                tracing::error!(
                    key = %key,
                    error = %reason,
                    "quota store rejected increment; check store configuration"
                );
                Err(Rejection::StoreFault {
                    retry_after: ceil_secs(self.policy.window()).max(1),
                })
            }
        }
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the circuit breaker.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Get the quota policy.
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Get the protected routes.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Get the token verifier.
    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Get the quota store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether `X-Forwarded-For` is trusted for the client address.
    pub fn trusts_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }
}

/// Extract the token from a `Bearer` authorization header value.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, InvalidToken> {
    let value = authorization.ok_or(InvalidToken::Missing)?;
    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| InvalidToken::Malformed("expected `Bearer <token>`".to_string()))?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(InvalidToken::Malformed(
            "expected `Bearer <token>`".to_string(),
        ));
    }
    Ok(token)
}
