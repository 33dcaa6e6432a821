//! Clicks-per-second meter. Lives beside the engine, not inside it.

use crate::types::Millis;

#[derive(Debug, Clone)]
pub struct ClickMeter {
    window_ms: Millis,
    window_start: Option<Millis>,
    clicks_in_window: u32,
    clicks_per_second: u32,
}

impl ClickMeter {
    pub fn new(window_ms: Millis) -> Self {
        Self {
            window_ms: window_ms.max(1),
            window_start: None,
            clicks_in_window: 0,
            clicks_per_second: 0,
        }
    }

    pub fn record(&mut self, now: Millis) {
        self.roll(now);
        self.clicks_in_window += 1;
    }

    /// Close the current window if it has elapsed and publish its rate.
    pub fn roll(&mut self, now: Millis) {
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now - start;
        if elapsed < 0 {
            self.window_start = Some(now);
        } else if elapsed >= self.window_ms {
            let per_second = i64::from(self.clicks_in_window) * 1_000 / self.window_ms;
            self.clicks_per_second = u32::try_from(per_second).unwrap_or(u32::MAX);
            self.clicks_in_window = 0;
            self.window_start = Some(now);
        }
    }

    pub fn clicks_per_second(&self) -> u32 {
        self.clicks_per_second
    }
}
