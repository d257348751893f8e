//! Time source abstraction
//!
//! The scheduler and the dedup logic compare against an injected clock so
//! tests can drive simulated days without wall-clock sleeps.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

/// A source of "now".
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and simulation.
#[derive(Clone)]
pub struct ManualClock {
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at a specific instant.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(RwLock::new(time)),
        }
    }

    /// Jump to a specific instant.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.write().unwrap() = time;
    }

    /// Move forward by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap();
        *current += duration;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.advance(Duration::seconds(seconds));
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }

    pub fn advance_days(&self, days: i64) {
        self.advance(Duration::days(days));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().unwrap()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}
