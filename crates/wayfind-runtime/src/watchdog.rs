//! [`SensorWatchdog`] – silent-producer monitor.
//!
//! The fusion worker calls [`SensorWatchdog::heartbeat`] for every reading it
//! takes off the sensor bus and periodically asks
//! [`SensorWatchdog::newly_silent`] which lanes have stopped delivering.
//! A silent lane is reported once per silence episode so the log is not
//! flooded while, say, GPS is unavailable indoors.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wayfind_middleware::SensorTopic;
//! use wayfind_runtime::watchdog::{SensorWatchdog, TopicHealth};
//!
//! let mut wd = SensorWatchdog::new();
//! wd.register(SensorTopic::Imu, Duration::from_secs(1));
//! wd.heartbeat(SensorTopic::Imu);
//!
//! assert_eq!(wd.health(SensorTopic::Imu), TopicHealth::Healthy);
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use wayfind_middleware::SensorTopic;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Per-lane silence deadlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub imu_timeout_ms: u64,
    pub visual_timeout_ms: u64,
    pub gps_timeout_ms: u64,
    /// How often the worker checks the deadlines.
    pub check_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            imu_timeout_ms: 1_000,
            visual_timeout_ms: 2_000,
            gps_timeout_ms: 10_000,
            check_interval_ms: 1_000,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single sensor lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicHealth {
    /// A reading arrived within the deadline.
    Healthy,
    /// Nothing arrived within the deadline.
    Silent,
}

struct TopicEntry {
    last_seen: Instant,
    timeout: Duration,
    reported: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// SensorWatchdog
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SensorWatchdog {
    topics: HashMap<SensorTopic, TopicEntry>,
}

impl SensorWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch the IMU, visual and GPS lanes with the configured deadlines.
    pub fn from_config(config: &WatchdogConfig) -> Self {
        let mut wd = Self::new();
        wd.register(SensorTopic::Imu, Duration::from_millis(config.imu_timeout_ms));
        wd.register(SensorTopic::Visual, Duration::from_millis(config.visual_timeout_ms));
        wd.register(SensorTopic::Gps, Duration::from_millis(config.gps_timeout_ms));
        wd
    }

    /// Watch `topic`; the deadline starts now. Re-registering resets it.
    pub fn register(&mut self, topic: SensorTopic, timeout: Duration) {
        self.topics.insert(
            topic,
            TopicEntry {
                last_seen: Instant::now(),
                timeout,
                reported: false,
            },
        );
    }

    /// Record a reading on `topic`. Unwatched topics are ignored.
    pub fn heartbeat(&mut self, topic: SensorTopic) {
        if let Some(entry) = self.topics.get_mut(&topic) {
            entry.last_seen = Instant::now();
            entry.reported = false;
        }
    }

    /// Unwatched topics report [`TopicHealth::Silent`].
    pub fn health(&self, topic: SensorTopic) -> TopicHealth {
        match self.topics.get(&topic) {
            Some(entry) if entry.last_seen.elapsed() <= entry.timeout => TopicHealth::Healthy,
            _ => TopicHealth::Silent,
        }
    }

    /// Every watched topic currently past its deadline.
    pub fn check_all(&self) -> Vec<SensorTopic> {
        self.topics
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > entry.timeout)
            .map(|(topic, _)| *topic)
            .collect()
    }

    /// Topics that went silent since the last call, each with how long it
    /// has been quiet.
    pub fn newly_silent(&mut self) -> Vec<(SensorTopic, Duration)> {
        self.topics
            .iter_mut()
            .filter(|(_, entry)| !entry.reported && entry.last_seen.elapsed() > entry.timeout)
            .map(|(topic, entry)| {
                entry.reported = true;
                (*topic, entry.last_seen.elapsed())
            })
            .collect()
    }
}
