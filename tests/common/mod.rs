//! Shared helpers for integration tests.

#![allow(dead_code)]

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use quota_gate::infrastructure::mocks::MockClock;
use quota_gate::TokenValidator;
use serde_json::json;
use std::time::Instant;

pub const SECRET: &[u8] = b"integration-signing-secret";

/// Mock clock starting now, wall clock at `MOCK_UNIX_START`.
pub fn clock() -> MockClock {
    MockClock::new(Instant::now())
}

pub fn validator() -> TokenValidator {
    TokenValidator::hs256(SECRET).unwrap()
}

/// HS256 token for `subject` expiring `ttl_secs` after `now`.
pub fn token_for(subject: &str, now: u64, ttl_secs: u64) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &json!({ "sub": subject, "exp": now + ttl_secs, "iat": now }),
        &EncodingKey::from_secret(SECRET),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
