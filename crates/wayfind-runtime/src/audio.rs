//! Spatial Audio Renderer.
//!
//! Turns a polar direction (bearing, elevation, distance) into a
//! listener-relative [`AudioPlacement`] for the external spatial-audio mixer.
//! The listener sits at the origin facing `-Z` with `+X` to the right and
//! `+Y` up:
//!
//! ```text
//! x =  sin(bearing) · cos(elevation) · r
//! y =  sin(elevation)                · r
//! z = −cos(bearing) · cos(elevation) · r        r = clamp(distance, 0.5, 10)
//! ```
//!
//! Gain falls and pulse cadence rises linearly across the clamped range, so
//! far targets stay audible and near ones never get overwhelming. The
//! [`AudioRole`] is passed through for the mixer's ducking; nothing here
//! mixes or plays audio.
//!
//! # Example
//!
//! ```rust
//! use wayfind_runtime::audio::{AudioConfig, SpatialAudioRenderer};
//! use wayfind_types::AudioRole;
//!
//! let renderer = SpatialAudioRenderer::new(AudioConfig::default());
//! let right = renderer
//!     .render(std::f64::consts::FRAC_PI_2, 0.0, 3.0, AudioRole::Navigation)
//!     .unwrap();
//! assert!((right.x - 3.0).abs() < 1e-9);
//! assert!(right.z.abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use wayfind_types::{AudioPlacement, AudioRole, NavError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub min_render_distance_m: f64,
    pub max_render_distance_m: f64,
    pub min_gain: f64,
    pub max_gain: f64,
    pub min_cadence_hz: f64,
    pub max_cadence_hz: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            min_render_distance_m: 0.5,
            max_render_distance_m: 10.0,
            min_gain: 0.2,
            max_gain: 1.0,
            min_cadence_hz: 0.5,
            max_cadence_hz: 4.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpatialAudioRenderer {
    config: AudioConfig,
}

impl SpatialAudioRenderer {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn render(
        &self,
        bearing_rad: f64,
        elevation_rad: f64,
        distance_m: f64,
        role: AudioRole,
    ) -> Result<AudioPlacement, NavError> {
        if !(bearing_rad.is_finite() && elevation_rad.is_finite() && distance_m.is_finite()) || distance_m < 0.0 {
            return Err(NavError::sensor_fault("audio", "non-finite or negative placement"));
        }
        let c = &self.config;
        let near = c.min_render_distance_m;
        let far = c.max_render_distance_m.max(near);
        let r = distance_m.clamp(near, far);
        // 0 at the near limit, 1 at the far limit.
        let t = if far > near { (r - near) / (far - near) } else { 0.0 };

        let horizontal = elevation_rad.cos() * r;
        Ok(AudioPlacement {
            x: bearing_rad.sin() * horizontal,
            y: elevation_rad.sin() * r,
            z: -bearing_rad.cos() * horizontal,
            gain: c.max_gain - t * (c.max_gain - c.min_gain),
            cadence_hz: c.max_cadence_hz - t * (c.max_cadence_hz - c.min_cadence_hz),
            role,
        })
    }

    /// Placement for a status alert played straight ahead at mid range.
    pub fn alert(&self) -> AudioPlacement {
        let c = &self.config;
        let mid = 0.5 * (c.min_render_distance_m + c.max_render_distance_m);
        AudioPlacement {
            x: 0.0,
            y: 0.0,
            z: -mid,
            gain: c.max_gain,
            cadence_hz: c.min_cadence_hz,
            role: AudioRole::Alert,
        }
    }
}

impl Default for SpatialAudioRenderer {
    fn default() -> Self {
        Self::new(AudioConfig::default())
    }
}
