//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Wall-clock reading a fresh `MockClock` starts at (2023-11-14T22:13:20Z).
pub const MOCK_UNIX_START: Duration = Duration::from_secs(1_700_000_000);

#[derive(Debug, Clone, Copy)]
struct ClockState {
    instant: Instant,
    unix: Duration,
}

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly. The monotonic
/// instant and the wall-clock reading move together, so window expiry and
/// token expiry stay consistent.
///
/// `MockClock` is thread-safe and can be cloned to share across threads.
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    ///
    /// The wall clock starts at [`MOCK_UNIX_START`].
    pub fn new(start: Instant) -> Self {
        Self::with_unix_time(start, MOCK_UNIX_START)
    }

    /// Create a mock clock with an explicit wall-clock reading.
    pub fn with_unix_time(start: Instant, unix: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                instant: start,
                unix,
            })),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.instant += duration;
        state.unix += duration;
    }

    /// Current wall-clock reading in whole seconds, for minting tokens.
    pub fn unix_secs(&self) -> u64 {
        self.lock().unix.as_secs()
    }

    /// Set the wall clock without moving the monotonic instant.
    pub fn set_unix_time(&self, unix: Duration) {
        self.lock().unix = unix;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.lock().instant
    }

    fn unix_now(&self) -> Duration {
        self.lock().unix
    }
}
