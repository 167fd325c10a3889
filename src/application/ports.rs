//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::identity::{Identity, InvalidToken};
use crate::domain::key::RateLimitKey;
use crate::domain::policy::WindowCount;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current monotonic instant.
    fn now(&self) -> Instant;

    /// Get the current wall-clock time as a duration since the Unix epoch.
    ///
    /// Token expiry is expressed in Unix seconds, so validation needs wall time.
    fn unix_now(&self) -> Duration;
}

/// Failure reported by a quota store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network failure or timeout; the store may come back.
    #[error("quota store unavailable: {0}")]
    Unavailable(String),
    /// The store answered but refused the operation.
    #[error("quota store rejected the operation: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Check if this is a transient availability failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Boxed future returned by [`QuotaStore::increment`].
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Port for the shared window-counter store.
///
/// Implementations must increment atomically: concurrent increments of the
/// same key, from any number of gate instances, never lose an update. The
/// first increment of a key in a window creates the counter with a ttl equal
/// to `window`; later increments in the same window leave the ttl untouched.
pub trait QuotaStore: Send + Sync + Debug {
    /// Increment the counter for `key` and read back the new count and ttl.
    fn increment<'a>(&'a self, key: &'a RateLimitKey, window: Duration)
        -> StoreFuture<'a, WindowCount>;
}

impl<S> QuotaStore for Arc<S>
where
    S: QuotaStore + ?Sized,
{
    fn increment<'a>(
        &'a self,
        key: &'a RateLimitKey,
        window: Duration,
    ) -> StoreFuture<'a, WindowCount> {
        (**self).increment(key, window)
    }
}

/// Port for bearer token verification.
///
/// Verification is synchronous and side-effect free apart from reading the
/// current key material.
pub trait IdentityVerifier: Send + Sync + Debug {
    /// Verify `token` at wall-clock time `now_unix` (seconds) and extract its identity.
    fn verify(&self, token: &str, now_unix: u64) -> Result<Identity, InvalidToken>;
}

impl<V> IdentityVerifier for Arc<V>
where
    V: IdentityVerifier + ?Sized,
{
    fn verify(&self, token: &str, now_unix: u64) -> Result<Identity, InvalidToken> {
        (**self).verify(token, now_unix)
    }
}
