//! # quota-gate
//!
//! Bearer-token authentication and per-identity request quotas in front of
//! versioned API routes.
//!
//! Every request under a protected prefix passes three steps before reaching
//! a handler:
//!
//! 1. **Token validation**: the bearer token's signature and expiry are
//!    verified and its subject becomes the request identity.
//! 2. **Counting**: a fixed-window counter keyed by `scope:identity` (or
//!    `scope:client-address` without a valid identity) is incremented
//!    atomically in a shared quota store.
//! 3. **Decision**: over-quota requests get `429` with `Retry-After`;
//!    requests without a valid token on authenticated routes get `401`;
//!    everything else is forwarded with the identity attached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{middleware, routing::get, Router};
//! use quota_gate::{gate_middleware, InMemoryQuotaStore, RequestGate, SystemClock, TokenValidator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = InMemoryQuotaStore::new(Arc::new(SystemClock::new()));
//! let validator = TokenValidator::hs256(b"signing-secret").unwrap();
//!
//! let gate = RequestGate::builder(store, validator)
//!     .with_quota(100, Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//!
//! let app: Router = Router::new()
//!     .route("/api/v1/topics", get(|| async { "topics" }))
//!     .layer(middleware::from_fn_with_state(
//!         Arc::new(gate),
//!         gate_middleware::<InMemoryQuotaStore, TokenValidator>,
//!     ));
//! ```
//!
//! ## Store Outages
//!
//! The quota store is a network dependency. When it stops answering, the
//! gate keeps admitting requests (uncounted) for up to `fail_open_threshold`
//! consecutive failures, then fails closed with `429` until the recovery
//! timeout passes and a probe succeeds. Store calls are bounded by a
//! timeout; a timeout counts as a failure.
//!
//! ## Over-admission Bound
//!
//! Counting is fixed-window: at most `limit` requests per key are admitted
//! per window, plus at most the number of requests in flight at the moment
//! the limit is crossed. Store-side atomic increments make the count itself
//! exact across any number of gate instances.
//!
//! ## Observability
//!
//! ```rust,no_run
//! # use quota_gate::{InMemoryQuotaStore, RequestGate, SystemClock, TokenValidator};
//! # use std::sync::Arc;
//! # let store = InMemoryQuotaStore::new(Arc::new(SystemClock::new()));
//! # let gate = RequestGate::builder(store, TokenValidator::hs256(b"s").unwrap()).build().unwrap();
//! let snapshot = gate.metrics().snapshot();
//! println!("admitted: {}", snapshot.admitted);
//! println!("fail-open admits: {}", snapshot.fail_open_admits);
//! println!("rejection rate: {:.2}%", snapshot.rejection_rate() * 100.0);
//! ```
//!
//! ## Feature Flags
//!
//! - `axum` (default): [`gate_middleware`] and `IntoResponse` for [`Rejection`]
//! - `redis-storage`: [`RedisQuotaStore`] for quotas shared across instances
//! - `test-helpers`: mock clock, scriptable store and table-driven verifier

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    identity::{Identity, InvalidToken, RequestIdentity},
    key::{KeySubject, RateLimitKey, RouteScope},
    policy::{AdmissionDecision, PolicyError, QuotaPolicy, WindowCount},
    route::{ProtectedRoute, RouteError, RouteTable},
};

pub use application::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, FailureVerdict},
    gate::{
        bearer_token, Admission, BuildError, GateOutcome, GateRequest, QuotaStatus, Rejection,
        RequestGate, RequestGateBuilder,
    },
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, IdentityVerifier, QuotaStore, StoreError, StoreFuture},
};

pub use infrastructure::{
    clock::SystemClock,
    config::{ConfigError, GateConfig},
    storage::InMemoryQuotaStore,
    token::{KeyError, KeySet, TokenValidator, TokenValidatorConfig, VerificationKey},
};

#[cfg(feature = "axum")]
pub use infrastructure::middleware::{gate_middleware, request_identity};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_storage::{RedisQuotaStore, RedisStoreConfig};
