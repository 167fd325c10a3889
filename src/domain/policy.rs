//! Fixed-window quota policy.
//!
//! The quota store owns the counters; this module only interprets what the
//! store reports back after an atomic increment. A request is admitted while
//! the post-increment count stays within the limit, and rejected with a
//! retry-after equal to the time left in the current window otherwise.

use std::time::Duration;
use thiserror::Error;

/// Error returned when policy parameters are invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A quota of zero would reject every request
    #[error("quota limit must be greater than 0")]
    ZeroLimit,
    /// Window duration must be positive
    #[error("quota window must be greater than 0")]
    ZeroWindow,
}

/// Decision made for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Forward the request downstream
    Allow,
    /// Reject; the caller may retry after this many seconds
    RejectWithRetryAfter(u64),
}

impl AdmissionDecision {
    /// Check if this decision is Allow.
    pub fn is_allow(&self) -> bool {
        matches!(self, AdmissionDecision::Allow)
    }

    /// Check if this decision is a rejection.
    pub fn is_reject(&self) -> bool {
        matches!(self, AdmissionDecision::RejectWithRetryAfter(_))
    }

    /// The retry-after value, if this is a rejection.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AdmissionDecision::Allow => None,
            AdmissionDecision::RejectWithRetryAfter(secs) => Some(*secs),
        }
    }
}

/// A window counter as read back from the store right after incrementing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// Time until the window expires
    pub ttl: Duration,
}

impl WindowCount {
    /// Create a window reading.
    pub fn new(count: u64, ttl: Duration) -> Self {
        Self { count, ttl }
    }
}

/// Flat per-key quota over fixed windows.
///
/// # Example
/// ```
/// use quota_gate::{QuotaPolicy, WindowCount};
/// use std::time::Duration;
///
/// let policy = QuotaPolicy::new(2, Duration::from_secs(60)).unwrap();
///
/// assert!(policy.evaluate(&WindowCount::new(1, Duration::from_secs(60))).is_allow());
/// assert!(policy.evaluate(&WindowCount::new(2, Duration::from_secs(59))).is_allow());
///
/// let third = policy.evaluate(&WindowCount::new(3, Duration::from_millis(58_200)));
/// assert_eq!(third.retry_after(), Some(59));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    limit: u64,
    window: Duration,
}

impl QuotaPolicy {
    /// Create a fixed-window policy.
    ///
    /// # Errors
    /// Returns `PolicyError` if `limit` or `window` is zero.
    pub fn new(limit: u64, window: Duration) -> Result<Self, PolicyError> {
        if limit == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self { limit, window })
    }

    /// Requests allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide on a request given the post-increment window reading.
    pub fn evaluate(&self, counted: &WindowCount) -> AdmissionDecision {
        if counted.count <= self.limit {
            AdmissionDecision::Allow
        } else {
            AdmissionDecision::RejectWithRetryAfter(self.retry_after(counted.ttl))
        }
    }

    /// Requests left in the window after this reading.
    pub fn remaining(&self, counted: &WindowCount) -> u64 {
        self.limit.saturating_sub(counted.count)
    }

    /// Whole seconds until the window resets, within `1..=window`.
    pub fn retry_after(&self, ttl: Duration) -> u64 {
        ceil_secs(ttl.min(self.window)).max(1)
    }
}

/// Round a duration up to whole seconds.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
