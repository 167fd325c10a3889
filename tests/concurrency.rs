//! Concurrent counting: no lost increments, no over-admission.

mod common;

use common::{bearer, token_for, validator};
use proptest::prelude::*;
use quota_gate::{
    GateOutcome, GateRequest, Identity, InMemoryQuotaStore, QuotaStore, RateLimitKey, RequestGate,
    RouteScope,
};
use std::sync::Arc;
use std::time::Duration;

fn key(subject: &str) -> RateLimitKey {
    let identity = Identity::new(subject).unwrap();
    RateLimitKey::derive(&RouteScope::new("api-v1"), Some(&identity), None).unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// N concurrent increments of one key leave the count at exactly N.
    #[test]
    fn test_concurrent_increments_are_never_lost(n in 1u64..400) {
        let rt = runtime();
        let counted = rt.block_on(async {
            let store = Arc::new(InMemoryQuotaStore::new(Arc::new(common::clock())));
            let key = key("alice");

            let tasks: Vec<_> = (0..n)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let key = key.clone();
                    tokio::spawn(async move {
                        store.increment(&key, Duration::from_secs(60)).await.unwrap();
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            store.increment(&key, Duration::from_secs(60)).await.unwrap().count
        });

        prop_assert_eq!(counted, n + 1);
    }

    /// Concurrent requests for one identity admit exactly min(N, limit).
    #[test]
    fn test_concurrent_requests_never_exceed_limit(limit in 1u64..50, n in 1u64..150) {
        let rt = runtime();
        let (admitted, recorded) = rt.block_on(async {
            let clock = common::clock();
            let gate = Arc::new(
                RequestGate::builder(InMemoryQuotaStore::new(Arc::new(clock.clone())), validator())
                    .with_quota(limit, Duration::from_secs(60))
                    .with_clock(Arc::new(clock.clone()))
                    .build()
                    .unwrap(),
            );
            let header = Arc::new(bearer(&token_for("alice", clock.unix_secs(), 600)));

            let tasks: Vec<_> = (0..n)
                .map(|_| {
                    let gate = Arc::clone(&gate);
                    let header = Arc::clone(&header);
                    tokio::spawn(async move {
                        let request =
                            GateRequest::new("/api/v1/topics").with_authorization(header.as_str());
                        matches!(gate.evaluate(&request).await, GateOutcome::Forward(_))
                    })
                })
                .collect();

            let mut admitted: u64 = 0;
            for task in tasks {
                if task.await.unwrap() {
                    admitted += 1;
                }
            }
            (admitted, gate.metrics().admitted())
        });

        prop_assert_eq!(admitted, n.min(limit));
        prop_assert_eq!(recorded, admitted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_identities_do_not_interfere() {
    let store = Arc::new(InMemoryQuotaStore::new(Arc::new(common::clock())));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let key = key(&format!("user-{}", i));
                for _ in 0..25 {
                    store.increment(&key, Duration::from_secs(60)).await.unwrap();
                }
                key
            })
        })
        .collect();

    for task in tasks {
        let key = task.await.unwrap();
        let next = store.increment(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(next.count, 26);
    }
}
