//! Scriptable quota store for failure testing.

use crate::application::ports::{Clock, QuotaStore, StoreError, StoreFuture};
use crate::domain::key::RateLimitKey;
use crate::domain::policy::WindowCount;
use crate::infrastructure::storage::InMemoryQuotaStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Quota store whose availability tests can switch at will.
///
/// Counts like [`InMemoryQuotaStore`] while healthy. `fail_with` makes every
/// call return the given error until `recover`; `delay_by` makes every call
/// sleep first, for exercising store timeouts. `recover` clears both.
#[derive(Debug)]
pub struct ScriptedStore {
    inner: InMemoryQuotaStore,
    failure: Mutex<Option<StoreError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU64,
    keys: Mutex<Vec<String>>,
}

impl ScriptedStore {
    /// Create a healthy store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: InMemoryQuotaStore::new(clock),
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            calls: AtomicU64::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    /// Fail every subsequent call with `error`.
    pub fn fail_with(&self, error: StoreError) {
        *self.failure.lock().expect("ScriptedStore mutex poisoned") = Some(error);
    }

    /// Fail every subsequent call as if the connection were refused.
    pub fn go_down(&self) {
        self.fail_with(StoreError::Unavailable("connection refused".to_string()));
    }

    /// Stop failing and stop delaying.
    pub fn recover(&self) {
        *self.failure.lock().expect("ScriptedStore mutex poisoned") = None;
        *self.delay.lock().expect("ScriptedStore mutex poisoned") = None;
    }

    /// Sleep for `delay` before answering each call.
    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().expect("ScriptedStore mutex poisoned") = Some(delay);
    }

    /// Number of increments attempted.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Keys passed to `increment`, in call order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().expect("ScriptedStore mutex poisoned").clone()
    }
}

impl QuotaStore for ScriptedStore {
    fn increment<'a>(
        &'a self,
        key: &'a RateLimitKey,
        window: Duration,
    ) -> StoreFuture<'a, WindowCount> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.keys
                .lock()
                .expect("ScriptedStore mutex poisoned")
                .push(key.to_string());

            let delay = *self.delay.lock().expect("ScriptedStore mutex poisoned");
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let failure = self
                .failure
                .lock()
                .expect("ScriptedStore mutex poisoned")
                .clone();
            match failure {
                Some(error) => Err(error),
                None => Ok(self.inner.increment_now(key, window)),
            }
        })
    }
}
