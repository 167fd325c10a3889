//! Circuit breaker guarding the quota store.
//!
//! Implements the bounded fail-open policy for store outages. While the
//! number of consecutive store failures stays within the configured
//! threshold, requests are admitted without a count (fail open). Once the
//! threshold is exceeded the circuit opens and requests are rejected without
//! touching the store (fail closed) until the recovery timeout elapses; then
//! the circuit half-opens and lets requests probe the store again. The first
//! successful round trip closes the circuit.

use crate::application::ports::Clock;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store is healthy, or failing within the fail-open budget
    Closed = 0,
    /// Failure budget exhausted, rejecting without consulting the store
    Open = 1,
    /// Recovery timeout elapsed, probing the store
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive store failures that are still admitted (fail open)
    pub fail_open_threshold: u32,
    /// How long to fail closed before probing the store again
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_open_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// How the gate must treat a request whose store call just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Within the failure budget: admit without a count
    FailOpen {
        /// Consecutive failures including this one
        consecutive: u64,
    },
    /// Budget exceeded: reject
    FailClosed {
        /// Consecutive failures including this one
        consecutive: u64,
    },
}

/// Tracks consecutive store failures across all requests of one gate instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    /// Reference epoch for timestamp calculations
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a circuit breaker reading time from `clock`.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_failure_nanos: AtomicU64::new(0),
            config,
            clock,
            epoch,
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get the breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether the store should be consulted for this request.
    ///
    /// Returns `false` while the circuit is open and the recovery timeout has
    /// not elapsed; the request must then be rejected.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.time_since_last_failure() < self.config.recovery_timeout {
                    return false;
                }
                let transitioned = self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if transitioned {
                    tracing::info!("quota store circuit half-open, probing store");
                }
                transitioned || self.state() != CircuitState::Open
            }
        }
    }

    /// Record a successful store round trip.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let previous = self
            .state
            .swap(CircuitState::Closed as u8, Ordering::AcqRel);
        if CircuitState::from(previous) != CircuitState::Closed {
            tracing::info!("quota store recovered, circuit closed");
        }
    }

    /// Record a store availability failure and decide how to treat the request.
    pub fn record_failure(&self) -> FailureVerdict {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        let nanos = self
            .clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX);
        self.last_failure_nanos.store(nanos, Ordering::Release);

        if failures <= u64::from(self.config.fail_open_threshold) {
            return FailureVerdict::FailOpen {
                consecutive: failures,
            };
        }

        let previous = self.state.swap(CircuitState::Open as u8, Ordering::AcqRel);
        if CircuitState::from(previous) != CircuitState::Open {
            tracing::warn!(
                consecutive_failures = failures,
                threshold = self.config.fail_open_threshold,
                recovery_secs = self.config.recovery_timeout.as_secs(),
                "quota store failure budget exhausted, circuit open"
            );
        }
        FailureVerdict::FailClosed {
            consecutive: failures,
        }
    }

    /// Time until the next store probe is allowed.
    pub fn retry_after(&self) -> Duration {
        self.config
            .recovery_timeout
            .saturating_sub(self.time_since_last_failure())
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    fn time_since_last_failure(&self) -> Duration {
        let nanos = self.last_failure_nanos.load(Ordering::Acquire);
        let last_failure = self.epoch + Duration::from_nanos(nanos);
        self.clock.now().saturating_duration_since(last_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    fn breaker(threshold: u32, recovery_secs: u64) -> (CircuitBreaker, MockClock) {
        let clock = MockClock::new(Instant::now());
        let config = CircuitBreakerConfig {
            fail_open_threshold: threshold,
            recovery_timeout: Duration::from_secs(recovery_secs),
        };
        (CircuitBreaker::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_initial_state() {
        let (cb, _) = breaker(3, 10);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_fail_open_within_threshold() {
        let (cb, _) = breaker(3, 10);

        for expected in 1..=3 {
            assert_eq!(
                cb.record_failure(),
                FailureVerdict::FailOpen {
                    consecutive: expected
                }
            );
            assert_eq!(cb.state(), CircuitState::Closed);
        }

        assert_eq!(
            cb.record_failure(),
            FailureVerdict::FailClosed { consecutive: 4 }
        );
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_zero_threshold_fails_closed_immediately() {
        let (cb, _) = breaker(0, 10);
        assert_eq!(
            cb.record_failure(),
            FailureVerdict::FailClosed { consecutive: 1 }
        );
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_budget() {
        let (cb, _) = breaker(2, 10);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);

        assert!(matches!(
            cb.record_failure(),
            FailureVerdict::FailOpen { consecutive: 1 }
        ));
    }

    #[test]
    fn test_recovery_after_timeout() {
        let (cb, clock) = breaker(1, 10);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.retry_after(), Duration::from_secs(10));

        clock.advance(Duration::from_secs(4));
        assert!(!cb.allow_request());
        assert_eq!(cb.retry_after(), Duration::from_secs(6));

        clock.advance(Duration::from_secs(6));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Concurrent probes are allowed while half-open
        assert!(cb.allow_request());
    }

    #[test]
    fn test_half_open_success_closes_circuit() {
        let (cb, clock) = breaker(1, 5);

        cb.record_failure();
        cb.record_failure();
        clock.advance(Duration::from_secs(5));
        assert!(cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens_circuit() {
        let (cb, clock) = breaker(1, 5);

        cb.record_failure();
        cb.record_failure();
        clock.advance(Duration::from_secs(5));
        assert!(cb.allow_request());

        assert!(matches!(
            cb.record_failure(),
            FailureVerdict::FailClosed { consecutive: 3 }
        ));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_reset() {
        let (cb, _) = breaker(0, 5);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_concurrent_failures_are_all_counted() {
        let (cb, _) = breaker(1_000, 5);
        let cb = Arc::new(cb);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cb.consecutive_failures(), 800);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
