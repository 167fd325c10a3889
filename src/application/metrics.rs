//! Observability metrics for admission decisions.
//!
//! Provides counters about gate behavior for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    admitted: AtomicU64,
    rejected_quota: AtomicU64,
    rejected_auth: AtomicU64,
    rejected_unattributable: AtomicU64,
    fail_open_admits: AtomicU64,
    fail_closed_rejects: AtomicU64,
    store_faults: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_quota_rejection(&self) {
        self.inner.rejected_quota.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_auth_rejection(&self) {
        self.inner.rejected_auth.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unattributable(&self) {
        self.inner
            .rejected_unattributable
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_open(&self) {
        self.inner.fail_open_admits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_closed(&self) {
        self.inner
            .fail_closed_rejects
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_fault(&self) {
        self.inner.store_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests forwarded downstream (including fail-open admissions).
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Requests rejected because the quota was exhausted.
    pub fn rejected_quota(&self) -> u64 {
        self.inner.rejected_quota.load(Ordering::Relaxed)
    }

    /// Requests rejected for a missing or invalid token.
    pub fn rejected_auth(&self) -> u64 {
        self.inner.rejected_auth.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            admitted: inner.admitted.load(Ordering::Relaxed),
            rejected_quota: inner.rejected_quota.load(Ordering::Relaxed),
            rejected_auth: inner.rejected_auth.load(Ordering::Relaxed),
            rejected_unattributable: inner.rejected_unattributable.load(Ordering::Relaxed),
            fail_open_admits: inner.fail_open_admits.load(Ordering::Relaxed),
            fail_closed_rejects: inner.fail_closed_rejects.load(Ordering::Relaxed),
            store_faults: inner.store_faults.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        let inner = &self.inner;
        inner.admitted.store(0, Ordering::Relaxed);
        inner.rejected_quota.store(0, Ordering::Relaxed);
        inner.rejected_auth.store(0, Ordering::Relaxed);
        inner.rejected_unattributable.store(0, Ordering::Relaxed);
        inner.fail_open_admits.store(0, Ordering::Relaxed);
        inner.fail_closed_rejects.store(0, Ordering::Relaxed);
        inner.store_faults.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests forwarded downstream
    pub admitted: u64,
    /// Quota rejections
    pub rejected_quota: u64,
    /// Authentication rejections
    pub rejected_auth: u64,
    /// Requests with no identity and no client address
    pub rejected_unattributable: u64,
    /// Admissions made without a count because the store was unavailable
    pub fail_open_admits: u64,
    /// Rejections made because the store failure budget was exhausted
    pub fail_closed_rejects: u64,
    /// Protocol-level store rejections
    pub store_faults: u64,
}

impl MetricsSnapshot {
    /// Total rejections of any kind.
    pub fn total_rejected(&self) -> u64 {
        self.rejected_quota
            .saturating_add(self.rejected_auth)
            .saturating_add(self.rejected_unattributable)
            .saturating_add(self.fail_closed_rejects)
            .saturating_add(self.store_faults)
    }

    /// Fraction of evaluated requests that were rejected (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        let rejected = self.total_rejected();
        let total = self.admitted.saturating_add(rejected);
        if total == 0 {
            0.0
        } else {
            rejected as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let metrics = Metrics::new();
        let clone = metrics.clone();

        clone.record_admitted();
        clone.record_quota_rejection();
        metrics.record_auth_rejection();

        assert_eq!(metrics.admitted(), 1);
        assert_eq!(metrics.rejected_quota(), 1);
        assert_eq!(clone.rejected_auth(), 1);
    }

    #[test]
    fn test_snapshot_and_rates() {
        let metrics = Metrics::new();
        for _ in 0..3 {
            metrics.record_admitted();
        }
        metrics.record_fail_open();
        metrics.record_fail_closed();
        metrics.record_store_fault();
        metrics.record_unattributable();
        metrics.record_quota_rejection();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fail_open_admits, 1);
        assert_eq!(snapshot.total_rejected(), 4);
        assert!((snapshot.rejection_rate() - 4.0 / 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_admitted();
        metrics.record_store_fault();
        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert_eq!(MetricsSnapshot::default().rejection_rate(), 0.0);
    }
}
