//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Token verification (`jsonwebtoken`)
//! - Quota stores (in-process sharded map, Redis)
//! - HTTP integration (axum middleware)
//! - Configuration loading (`figment`)

pub mod clock;
pub mod config;
pub mod storage;
pub mod token;

#[cfg(feature = "axum")]
pub mod middleware;

#[cfg(feature = "redis-storage")]
pub mod redis_storage;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
