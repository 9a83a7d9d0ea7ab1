//! Engine clock: the single source of "now" for every timestamp the engine writes.
//!
//! RULE: nothing in the engine calls `Utc::now()` directly.
//! Tests and the runner inject a `ManualClock` so expiry and ordering are reproducible.

use crate::types::Timestamp;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Settable clock for tests and simulation.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { current: Mutex::new(start) }
    }

    /// Advance by `by`. Returns the new instant.
    pub fn advance(&self, by: Duration) -> Timestamp {
        let mut current = self.current.lock();
        *current += by;
        *current
    }

    pub fn set(&self, to: Timestamp) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}
