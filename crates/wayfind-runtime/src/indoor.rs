//! Indoor Navigator.
//!
//! Guides towards a target stored in the active local map. Distance is the
//! straight 3-D distance; bearing and elevation are measured in the device's
//! own body frame (derived from the fused orientation, never from a compass):
//!
//! ```text
//! d_body    = R⁻¹ · (target − position)
//! bearing   = atan2(d_body.x, −d_body.z)      0 ahead, +right, ±π behind
//! elevation = atan2(d_body.y, ‖(d_body.x, d_body.z)‖)
//! ```
//!
//! Arrival needs the user to stay inside the arrival radius for the whole
//! dwell time, so a single noisy sample never ends the session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wayfind_types::{MapId, NavError, Pose3D, Position, SpatialObject};

use crate::hysteresis::DwellTimer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndoorConfig {
    pub arrival_radius_m: f64,
    pub arrival_dwell_ms: u64,
}

impl Default for IndoorConfig {
    fn default() -> Self {
        Self {
            arrival_radius_m: 0.5,
            arrival_dwell_ms: 1000,
        }
    }
}

/// Output of one [`IndoorNavigator::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndoorGuidance {
    pub distance_m: f64,
    /// Horizontal angle from the device's forward axis; positive to the
    /// right.
    pub bearing_rad: f64,
    /// Angle above the device's horizontal plane.
    pub elevation_rad: f64,
    pub arrived: bool,
}

#[derive(Debug, Clone)]
pub struct IndoorNavigator {
    config: IndoorConfig,
    target_name: String,
    target: Position,
    map: MapId,
    arrival: DwellTimer,
}

impl IndoorNavigator {
    /// Start guiding to `target`.
    ///
    /// Fails with [`NavError::MapMismatch`] unless the target has a local
    /// position recorded in `active_map`.
    pub fn start(target: &SpatialObject, active_map: &MapId, config: IndoorConfig) -> Result<Self, NavError> {
        let position = match target.local_position {
            Some(p) if target.is_in_map(active_map) => p,
            _ => {
                return Err(NavError::MapMismatch {
                    target: target.map_id.as_ref().map(|m| m.to_string()),
                    active: active_map.to_string(),
                });
            }
        };
        info!(target = %target.name, map = %active_map, "indoor navigation started");
        Ok(Self {
            arrival: DwellTimer::new(Duration::from_millis(config.arrival_dwell_ms)),
            config,
            target_name: target.name.clone(),
            target: position,
            map: active_map.clone(),
        })
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn target_position(&self) -> Position {
        self.target
    }

    pub fn map(&self) -> &MapId {
        &self.map
    }

    pub fn tick(&mut self, pose: &Pose3D) -> IndoorGuidance {
        let (distance_m, bearing_rad, elevation_rad) = relative_polar(pose, self.target);
        let inside = distance_m < self.config.arrival_radius_m;
        let arrived = self.arrival.update(inside, pose.timestamp_ns);
        debug!(distance_m, bearing_rad, inside, "indoor tick");
        IndoorGuidance {
            distance_m,
            bearing_rad,
            elevation_rad,
            arrived,
        }
    }
}

/// Distance, bearing and elevation of `target` as seen from `pose`.
pub fn relative_polar(pose: &Pose3D, target: Position) -> (f64, f64, f64) {
    let d = pose.to_body(pose.position.offset_to(target));
    let horizontal = d.x.hypot(d.z);
    (d.norm(), d.x.atan2(-d.z), d.y.atan2(horizontal))
}
