//! Client clock: wall time source and fixed-cadence timers.
//!
//! The frame loop and the sync/refresh timers run on independent
//! cadences. Each IntervalTimer is polled from the frame loop and
//! decides for itself whether it is due.

use crate::types::Millis;
use std::cell::Cell;

pub trait Clock {
    fn now_millis(&self) -> Millis;
}

/// Device wall clock. May jump backwards if the user changes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests and offline simulation.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Millis>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self { now: Cell::new(start) }
    }

    pub fn set(&self, now: Millis) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Millis) -> Millis {
        let next = self.now.get() + by;
        self.now.set(next);
        next
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.get()
    }
}

/// A repeating timer. Fires at most once per `due` call and re-arms from `now`,
/// so a stalled loop never produces a burst of catch-up firings.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    pub interval_ms: Millis,
    next_due: Option<Millis>,
}

impl IntervalTimer {
    pub fn new(interval_ms: Millis) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            next_due: None,
        }
    }

    /// Start counting from `now`. The first firing is one interval later.
    pub fn arm(&mut self, now: Millis) {
        self.next_due = Some(now + self.interval_ms);
    }

    pub fn due(&mut self, now: Millis) -> bool {
        let Some(next) = self.next_due else {
            return false;
        };
        if now >= next {
            self.next_due = Some(now + self.interval_ms);
            return true;
        }
        // Clock moved backwards past the previous arming point: re-arm.
        if next - now > self.interval_ms {
            self.next_due = Some(now + self.interval_ms);
        }
        false
    }
}
