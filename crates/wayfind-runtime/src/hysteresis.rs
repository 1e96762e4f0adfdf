//! Hysteresis primitives shared by the mode selector and the navigators.
//!
//! Noisy sensor streams must never toggle user-facing state on a single
//! sample. Two small building blocks cover every case in the runtime:
//!
//! - [`StreakCounter`] – "N qualifying samples in a row" (e.g. three
//!   consecutive 3-D fixes before switching to outdoor mode).
//! - [`DwellTimer`] – "condition held continuously for at least T" (e.g.
//!   inside the arrival radius for one second, off route for ten).
//!
//! Both are driven by explicit timestamps so they can be tested without
//! sleeping.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use wayfind_runtime::hysteresis::{DwellTimer, StreakCounter};
//!
//! let mut streak = StreakCounter::new(3);
//! assert!(!streak.record(true));
//! assert!(!streak.record(true));
//! assert!(streak.record(true)); // third in a row
//! assert!(!streak.record(false)); // broken streak starts over
//!
//! let mut dwell = DwellTimer::new(Duration::from_secs(1));
//! assert!(!dwell.update(true, 0));
//! assert!(!dwell.update(true, 500_000_000));
//! assert!(dwell.update(true, 1_000_000_000));
//! ```

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// StreakCounter
// ─────────────────────────────────────────────────────────────────────────────

/// Counts consecutive qualifying observations.
#[derive(Debug, Clone)]
pub struct StreakCounter {
    threshold: u32,
    count: u32,
}

impl StreakCounter {
    /// `threshold` consecutive `true` records complete the streak. A
    /// threshold of 0 is treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
        }
    }

    /// Record one observation. Returns `true` while the streak is complete.
    pub fn record(&mut self, qualifies: bool) -> bool {
        if qualifies {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DwellTimer
// ─────────────────────────────────────────────────────────────────────────────

/// Reports when a condition has held continuously for a minimum duration.
///
/// Timestamps are monotonic nanoseconds from the sensor clock. A timestamp
/// that goes backwards restarts the dwell.
#[derive(Debug, Clone)]
pub struct DwellTimer {
    dwell_ns: u64,
    since_ns: Option<u64>,
}

impl DwellTimer {
    pub fn new(dwell: Duration) -> Self {
        Self {
            dwell_ns: u64::try_from(dwell.as_nanos()).unwrap_or(u64::MAX),
            since_ns: None,
        }
    }

    /// Feed the condition observed at `now_ns`. Returns `true` once it has
    /// held from its first observation up to `now_ns` for at least the dwell.
    pub fn update(&mut self, condition: bool, now_ns: u64) -> bool {
        if !condition {
            self.since_ns = None;
            return false;
        }
        let since = match self.since_ns {
            Some(since) if since <= now_ns => since,
            _ => {
                self.since_ns = Some(now_ns);
                now_ns
            }
        };
        now_ns - since >= self.dwell_ns
    }

    /// How long the condition has held as of `now_ns`.
    pub fn held_for(&self, now_ns: u64) -> Duration {
        self.since_ns
            .map(|since| Duration::from_nanos(now_ns.saturating_sub(since)))
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.since_ns.is_some()
    }

    pub fn reset(&mut self) {
        self.since_ns = None;
    }
}
