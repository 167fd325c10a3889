//! In-process quota store.
//!
//! Provides concurrent, sharded window counters for single-instance
//! deployments and tests. Counters are not shared between processes; use the
//! Redis store when several gate instances must share one quota.

use crate::application::ports::{Clock, QuotaStore, StoreFuture};
use crate::domain::key::RateLimitKey;
use crate::domain::policy::WindowCount;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Table size at which the first automatic sweep runs.
pub const DEFAULT_SWEEP_FLOOR: usize = 1_024;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u64,
    expires_at: Instant,
}

/// Thread-safe window counters backed by DashMap.
///
/// The increment runs under the shard's entry lock, so concurrent increments
/// of one key are serialized and none is lost.
///
/// Expired windows are dropped by an automatic sweep. Whenever the table
/// reaches its sweep threshold, the increment that crossed it purges expired
/// entries and resets the threshold to twice the surviving count (never
/// below the floor). The table therefore stays under
/// `max(floor, 2 * live windows)` and the sweep cost is amortized over the
/// inserts that grew it.
#[derive(Debug)]
pub struct InMemoryQuotaStore {
    windows: DashMap<RateLimitKey, WindowEntry, RandomState>,
    clock: Arc<dyn Clock>,
    sweep_floor: usize,
    sweep_at: AtomicUsize,
}

impl InMemoryQuotaStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::with_hasher(RandomState::new()),
            clock,
            sweep_floor: DEFAULT_SWEEP_FLOOR,
            sweep_at: AtomicUsize::new(DEFAULT_SWEEP_FLOOR),
        }
    }

    /// Set the table size at which automatic sweeps start.
    pub fn with_sweep_floor(mut self, floor: usize) -> Self {
        let floor = floor.max(1);
        self.sweep_floor = floor;
        self.sweep_at = AtomicUsize::new(floor);
        self
    }

    /// Increment synchronously.
    ///
    /// The ttl is set when the window is created and never extended.
    pub fn increment_now(&self, key: &RateLimitKey, window: Duration) -> WindowCount {
        let now = self.clock.now();
        let counted = {
            let mut entry = self.windows.entry(key.clone()).or_insert(WindowEntry {
                count: 0,
                expires_at: now + window,
            });

            if entry.expires_at <= now {
                *entry = WindowEntry {
                    count: 0,
                    expires_at: now + window,
                };
            }
            entry.count = entry.count.saturating_add(1);

            WindowCount::new(entry.count, entry.expires_at.saturating_duration_since(now))
        };

        // The entry guard must be released before sweeping the shards
        self.maybe_sweep();
        counted
    }

    fn maybe_sweep(&self) {
        let threshold = self.sweep_at.load(Ordering::Acquire);
        if self.windows.len() < threshold {
            return;
        }
        // One sweeper at a time; losers keep counting
        if self
            .sweep_at
            .compare_exchange(threshold, usize::MAX, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let removed = self.purge_expired();
        let survivors = self.windows.len();
        let next = survivors.saturating_mul(2).max(self.sweep_floor);
        self.sweep_at.store(next, Ordering::Release);

        tracing::debug!(removed, survivors, next, "swept expired quota windows");
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked windows, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Check if no windows are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every window.
    pub fn clear(&self) {
        self.windows.clear();
        self.sweep_at.store(self.sweep_floor, Ordering::Release);
    }
}

impl QuotaStore for InMemoryQuotaStore {
    fn increment<'a>(
        &'a self,
        key: &'a RateLimitKey,
        window: Duration,
    ) -> StoreFuture<'a, WindowCount> {
        let counted = self.increment_now(key, window);
        Box::pin(async move { Ok(counted) })
    }
}
