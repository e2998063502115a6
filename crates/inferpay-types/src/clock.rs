//! The shared time source
//!
//! All timeout comparisons in InferPay read the same clock, and the clock
//! never goes backwards. The reference environment supplies an agreed-upon
//! timestamp per operation; outside it, `SystemClock` clamps wall-clock
//! regressions so two components never disagree about ordering.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// A monotonically non-decreasing time source shared by all components
pub trait Clock: Send + Sync {
    /// Current time; successive calls never go backwards
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock backed implementation
#[derive(Debug)]
pub struct SystemClock {
    last: Mutex<DateTime<Utc>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Utc::now()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().expect("clock mutex poisoned");
        let now = Utc::now().max(*last);
        *last = now;
        now
    }
}

/// Manually advanced clock for tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}
