//! Redis-backed quota store.
//!
//! Shares window counters across every gate instance pointed at the same
//! Redis, so a client's quota holds no matter which instance serves it.
//!
//! ## Architecture
//!
//! - Keys: `<key_prefix><scope>:<subject>`
//! - Values: the window's request count (plain Redis integer)
//! - TTL: set to the window length on the first increment only, so a window
//!   ends one window after its first request regardless of later traffic
//!
//! Increment, expiry and ttl read-back run in one Lua script, which Redis
//! executes atomically. A counter left without a ttl (for example after a
//! crash between commands on an older deployment) gets one on its next
//! increment instead of living forever.
//!
//! ## Error Handling
//!
//! Connection failures, timeouts and Redis reporting itself as loading or
//! unavailable map to [`StoreError::Unavailable`] and feed the gate's
//! bounded fail-open budget. Every other error (wrong type at the key, script
//! errors, unexpected replies) is a [`StoreError::Protocol`] fault.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quota_gate::{RedisQuotaStore, RequestGate, TokenValidator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisQuotaStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!     let validator = TokenValidator::hs256(b"secret").unwrap();
//!     let gate = RequestGate::builder(store, validator).build().unwrap();
//! }
//! ```

use crate::application::ports::{QuotaStore, StoreError, StoreFuture};
use crate::domain::key::RateLimitKey;
use crate::domain::policy::WindowCount;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisError, Script};
use std::fmt;
use std::time::Duration;

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Configuration for the Redis quota store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Key prefix for Redis keys (default: "quota-gate:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "quota-gate:".to_string(),
        }
    }
}

/// Redis-backed window counters.
#[derive(Clone)]
pub struct RedisQuotaStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    script: Script,
}

impl fmt::Debug for RedisQuotaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQuotaStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisQuotaStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            config,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Get the store configuration.
    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn redis_key(&self, key: &RateLimitKey) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

impl QuotaStore for RedisQuotaStore {
    fn increment<'a>(
        &'a self,
        key: &'a RateLimitKey,
        window: Duration,
    ) -> StoreFuture<'a, WindowCount> {
        Box::pin(async move {
            let redis_key = self.redis_key(key);
            let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
            let mut connection = self.connection.clone();

            let (count, ttl_ms): (u64, i64) = self
                .script
                .key(&redis_key)
                .arg(window_ms)
                .invoke_async(&mut connection)
                .await
                .map_err(classify)?;

            let ttl = Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0));
            Ok(WindowCount::new(count, ttl))
        })
    }
}

/// Sort a Redis error into "may come back" versus "will keep failing".
pub(crate) fn classify(error: RedisError) -> StoreError {
    let transient = error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || matches!(
            error.kind(),
            ErrorKind::BusyLoadingError | ErrorKind::TryAgain | ErrorKind::ClusterDown
        );

    if transient {
        StoreError::Unavailable(error.to_string())
    } else {
        StoreError::Protocol(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_errors_are_transient() {
        let error = RedisError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(classify(error).is_unavailable());
    }

    #[test]
    fn test_loading_is_transient() {
        let error = RedisError::from((ErrorKind::BusyLoadingError, "loading dataset"));
        assert!(classify(error).is_unavailable());
    }

    #[test]
    fn test_type_errors_are_protocol_faults() {
        let error = RedisError::from((ErrorKind::TypeError, "WRONGTYPE"));
        assert!(matches!(classify(error), StoreError::Protocol(_)));
    }

    #[test]
    fn test_default_prefix() {
        assert_eq!(RedisStoreConfig::default().key_prefix, "quota-gate:");
    }
}
