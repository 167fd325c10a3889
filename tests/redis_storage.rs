//! Integration tests for the Redis quota store.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --features redis-storage --test redis_storage -- --ignored`

#![cfg(feature = "redis-storage")]

use quota_gate::{
    Identity, QuotaStore, RateLimitKey, RedisQuotaStore, RedisStoreConfig, RouteScope,
};
use std::sync::Arc;
use std::time::Duration;

const REDIS_URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    RedisQuotaStore::connect(REDIS_URL).await.is_ok()
}

/// Create a store with a prefix unique to the test run
async fn create_test_store(test_name: &str) -> RedisQuotaStore {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let config = RedisStoreConfig {
        key_prefix: format!("test:{}:{}:", test_name, nanos),
    };

    RedisQuotaStore::connect_with_config(REDIS_URL, config)
        .await
        .expect("Failed to connect to Redis")
}

fn key(subject: &str) -> RateLimitKey {
    let identity = Identity::new(subject).unwrap();
    RateLimitKey::derive(&RouteScope::new("api-v1"), Some(&identity), None).unwrap()
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_first_increment_sets_window_ttl() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {}", REDIS_URL);
        return;
    }

    let store = create_test_store("first_increment").await;
    let first = store.increment(&key("alice"), Duration::from_secs(60)).await.unwrap();

    assert_eq!(first.count, 1);
    assert!(first.ttl > Duration::from_secs(59));
    assert!(first.ttl <= Duration::from_secs(60));
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_later_increments_keep_ttl() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("keep_ttl").await;
    let window = Duration::from_secs(2);
    store.increment(&key("alice"), window).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let second = store.increment(&key("alice"), window).await.unwrap();

    assert_eq!(second.count, 2);
    assert!(second.ttl < Duration::from_millis(1_000));
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_window_expires() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    let store = create_test_store("expires").await;
    let window = Duration::from_millis(300);
    store.increment(&key("alice"), window).await.unwrap();
    store.increment(&key("alice"), window).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.increment(&key("alice"), window).await.unwrap().count, 1);
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_concurrent_increments_across_connections() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available");
        return;
    }

    // Two stores stand in for two gate instances sharing one Redis
    let a = Arc::new(create_test_store("shared").await);
    let b = Arc::new(RedisQuotaStore::connect_with_config(REDIS_URL, a.config().clone())
        .await
        .unwrap());

    let tasks: Vec<_> = (0..200)
        .map(|i| {
            let store = if i % 2 == 0 { Arc::clone(&a) } else { Arc::clone(&b) };
            tokio::spawn(async move {
                store.increment(&key("bob"), Duration::from_secs(60)).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(a.increment(&key("bob"), Duration::from_secs(60)).await.unwrap().count, 201);
}
