//! Sliding-window admission over persisted iteration timestamps.
//!
//! Timestamps are unix seconds. Every function takes `now` explicitly so the
//! windows are deterministic under test.

use std::fmt;

pub const HOUR_SECS: i64 = 60 * 60;
pub const DAY_SECS: i64 = 24 * HOUR_SECS;

/// Iterations observed inside the trailing hour and day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub hour: u32,
    pub day: u32,
}

/// Count timestamps newer than `now - 1h` and `now - 24h` in one pass.
///
/// Entries exactly on a window's far edge have aged out of that window.
pub fn count_recent(timestamps: &[i64], now: i64) -> WindowCounts {
    let hour_ago = now - HOUR_SECS;
    let day_ago = now - DAY_SECS;
    let mut counts = WindowCounts::default();
    for &ts in timestamps {
        if ts > day_ago {
            counts.day += 1;
            if ts > hour_ago {
                counts.hour += 1;
            }
        }
    }
    counts
}

/// Drop every timestamp that has left the 24h window.
pub fn prune(timestamps: &mut Vec<i64>, now: i64) {
    let cutoff = now - DAY_SECS;
    timestamps.retain(|&ts| ts > cutoff);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    Hour,
    Day,
}

impl RateWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            RateWindow::Hour => "hour",
            RateWindow::Day => "day",
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured limit that the current counts have reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHit {
    pub window: RateWindow,
    pub count: u32,
    pub limit: u32,
}

/// Per-hour and per-day ceilings. Zero disables a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimits {
    pub max_per_hour: u32,
    pub max_per_day: u32,
}

impl RateLimits {
    pub fn is_enabled(&self) -> bool {
        self.max_per_hour > 0 || self.max_per_day > 0
    }

    /// Decide whether another iteration may start. The hourly window is checked first.
    pub fn admit(&self, counts: WindowCounts) -> Result<(), RateLimitHit> {
        if self.max_per_hour > 0 && counts.hour >= self.max_per_hour {
            return Err(RateLimitHit {
                window: RateWindow::Hour,
                count: counts.hour,
                limit: self.max_per_hour,
            });
        }
        if self.max_per_day > 0 && counts.day >= self.max_per_day {
            return Err(RateLimitHit {
                window: RateWindow::Day,
                count: counts.day,
                limit: self.max_per_day,
            });
        }
        Ok(())
    }
}
