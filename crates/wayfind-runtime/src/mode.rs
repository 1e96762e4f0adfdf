//! Navigation Mode Selector.
//!
//! A tagged state machine choosing between the indoor (local-frame) and
//! outdoor (GPS) navigators:
//!
//! ```text
//!            ≥3 consecutive good Fix3d                settle time
//!  Indoor ─────────────────────────────▶ Transitioning ───────────▶ Outdoor
//!    ▲                                   {from, to, since}             │
//!    │             settle time                                         │
//!    └──────────── Transitioning ◀─────────────────────────────────────┘
//!                                    no Fix3d for the staleness window
//! ```
//!
//! While transitioning, [`ModeSelector::active_mode`] keeps returning the
//! previous mode and all GPS evidence is ignored, so the audio never flaps
//! more than once per settle window.
//!
//! # Example
//!
//! ```rust
//! use wayfind_runtime::mode::{ModeConfig, ModeSelector};
//! use wayfind_types::{GeoCoordinate, NavMode};
//! use wayfind_types::geo::FixQuality;
//!
//! let mut selector = ModeSelector::new(ModeConfig::default());
//! let fix = |ts| GeoCoordinate::fix(1.3521, 103.8198, 0.0, 4.0, FixQuality::Fix3d, ts);
//! for i in 0..3 {
//!     selector.observe_fix(&fix(i * 1_000_000_000));
//! }
//! // Still speaking indoor guidance during the settle time.
//! assert_eq!(selector.active_mode(), NavMode::Indoor);
//!
//! let change = selector.tick(4_500_000_000).unwrap();
//! assert_eq!(change.to, NavMode::Outdoor);
//! assert_eq!(selector.active_mode(), NavMode::Outdoor);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use wayfind_types::geo::FixQuality;
use wayfind_types::{GeoCoordinate, NavMode, elapsed_secs};

use crate::hysteresis::StreakCounter;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Consecutive qualifying fixes needed to go outdoor.
    pub min_consecutive_fixes: u32,
    /// A `Fix3d` only counts towards going outdoor at or below this
    /// accuracy (m).
    pub max_fix_accuracy_m: f64,
    /// Outdoor falls back to indoor after this long without any `Fix3d`,
    /// whatever its accuracy.
    pub staleness_secs: f64,
    /// Length of the transitioning state.
    pub settle_secs: f64,
    pub initial_mode: NavMode,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            min_consecutive_fixes: 3,
            max_fix_accuracy_m: 10.0,
            staleness_secs: 10.0,
            settle_secs: 2.0,
            initial_mode: NavMode::Indoor,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeState {
    Indoor,
    Outdoor,
    Transitioning {
        from: NavMode,
        to: NavMode,
        /// Sensor-clock time the transition started (ns).
        since_ns: u64,
    },
}

impl ModeState {
    fn settled(mode: NavMode) -> Self {
        match mode {
            NavMode::Indoor => ModeState::Indoor,
            NavMode::Outdoor => ModeState::Outdoor,
        }
    }

    /// The mode whose navigator should currently be producing guidance.
    pub fn active_mode(&self) -> NavMode {
        match *self {
            ModeState::Indoor => NavMode::Indoor,
            ModeState::Outdoor => NavMode::Outdoor,
            ModeState::Transitioning { from, .. } => from,
        }
    }
}

/// A completed mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: NavMode,
    pub to: NavMode,
}

// ─────────────────────────────────────────────────────────────────────────────
// ModeSelector
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ModeSelector {
    config: ModeConfig,
    state: ModeState,
    fixes: StreakCounter,
    /// Sensor-clock time of the newest `Fix3d` while outdoor.
    last_fix3d_ns: Option<u64>,
}

impl ModeSelector {
    pub fn new(config: ModeConfig) -> Self {
        Self {
            state: ModeState::settled(config.initial_mode),
            fixes: StreakCounter::new(config.min_consecutive_fixes),
            last_fix3d_ns: None,
            config,
        }
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn active_mode(&self) -> NavMode {
        self.state.active_mode()
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self.state, ModeState::Transitioning { .. })
    }

    /// Feed one GPS sample (including `NoFix` samples).
    pub fn observe_fix(&mut self, geo: &GeoCoordinate) {
        match self.state {
            ModeState::Transitioning { .. } => {}
            ModeState::Indoor => {
                if self.fixes.record(self.qualifies(geo)) {
                    self.begin(NavMode::Indoor, NavMode::Outdoor, geo.timestamp_ns);
                }
            }
            ModeState::Outdoor => {
                if geo.is_valid() && geo.fix_quality == FixQuality::Fix3d {
                    let newest = self.last_fix3d_ns.map_or(geo.timestamp_ns, |t| t.max(geo.timestamp_ns));
                    self.last_fix3d_ns = Some(newest);
                }
            }
        }
    }

    /// Advance time to `now_ns`. Returns the change that completed, if any.
    pub fn tick(&mut self, now_ns: u64) -> Option<ModeChange> {
        match self.state {
            ModeState::Indoor => None,
            ModeState::Outdoor => {
                let last = *self.last_fix3d_ns.get_or_insert(now_ns);
                if elapsed_secs(last, now_ns) >= self.config.staleness_secs {
                    self.begin(NavMode::Outdoor, NavMode::Indoor, now_ns);
                }
                None
            }
            ModeState::Transitioning { from, to, since_ns } => {
                if elapsed_secs(since_ns, now_ns) < self.config.settle_secs {
                    return None;
                }
                self.state = ModeState::settled(to);
                self.fixes.reset();
                self.last_fix3d_ns = Some(now_ns);
                info!(?from, ?to, "navigation mode changed");
                Some(ModeChange { from, to })
            }
        }
    }

    /// Time left in the current transition as of `now_ns`.
    pub fn settle_remaining(&self, now_ns: u64) -> Option<Duration> {
        let ModeState::Transitioning { since_ns, .. } = self.state else {
            return None;
        };
        let left = (self.config.settle_secs - elapsed_secs(since_ns, now_ns)).max(0.0);
        Some(Duration::try_from_secs_f64(left).unwrap_or(Duration::MAX))
    }

    fn qualifies(&self, geo: &GeoCoordinate) -> bool {
        geo.is_valid()
            && geo.fix_quality == FixQuality::Fix3d
            && geo.horizontal_accuracy_m <= self.config.max_fix_accuracy_m
    }

    fn begin(&mut self, from: NavMode, to: NavMode, since_ns: u64) {
        info!(?from, ?to, "navigation mode transition started");
        self.state = ModeState::Transitioning { from, to, since_ns };
    }
}
