use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Controllable nanosecond clock for expiry and retention testing.
///
/// Pass it to `SessionStore`/`RetentionEngine` via their
/// `with_time_provider()` to control time during tests.
#[derive(Clone)]
pub struct MockClock {
    current: Arc<AtomicI64>,
}

impl MockClock {
    /// Creates a mock clock starting at the real current time.
    pub fn new() -> Self {
        Self {
            current: Arc::new(AtomicI64::new(entitydb_core::now_nanos())),
        }
    }

    /// Creates a time provider function suitable for `with_time_provider`.
    pub fn as_provider(&self) -> impl Fn() -> i64 + Send + Sync + 'static {
        let current = self.current.clone();
        move || current.load(Ordering::SeqCst)
    }

    /// Returns the current mock timestamp in nanoseconds.
    pub fn now(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Advances time by a duration.
    pub fn advance(&self, duration: Duration) {
        self.current
            .fetch_add(duration.as_nanos() as i64, Ordering::SeqCst);
    }

    /// Advances time by whole hours.
    pub fn advance_hours(&self, hours: u64) {
        self.advance(Duration::from_secs(hours * 3600));
    }

    /// Advances time by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}
