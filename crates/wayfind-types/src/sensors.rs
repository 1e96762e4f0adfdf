//! Raw sensor samples consumed by the fusion engine.
//!
//! GPS fixes are plain [`GeoCoordinate`][crate::GeoCoordinate]s; the IMU and
//! the external visual-odometry pipeline have their own sample types.

use serde::{Deserialize, Serialize};

use crate::frame::{Quaternion, Vec3};

/// One inertial measurement in the device body frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Angular rate (rad/s).
    pub gyro: Vec3,
    /// Specific force (m/s²). At rest and upright this reads `+g` along `+Y`.
    pub accel: Vec3,
    /// Magnetic field (any consistent unit), when the IMU carries a
    /// magnetometer.
    pub mag: Option<Vec3>,
    /// Monotonic sensor-clock timestamp (ns).
    pub timestamp_ns: u64,
}

impl ImuSample {
    pub fn new(gyro: Vec3, accel: Vec3, timestamp_ns: u64) -> Self {
        Self {
            gyro,
            accel,
            mag: None,
            timestamp_ns,
        }
    }

    pub fn with_mag(mut self, mag: Vec3) -> Self {
        self.mag = Some(mag);
        self
    }

    pub fn is_finite(&self) -> bool {
        self.gyro.is_finite() && self.accel.is_finite() && self.mag.is_none_or(|m| m.is_finite())
    }
}

/// Relative motion reported by the external visual-odometry front-end.
///
/// The delta is expressed in the body frame of the previous visual frame:
/// the device moved by `delta_position` and turned by `delta_orientation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualDelta {
    pub delta_position: Vec3,
    pub delta_orientation: Quaternion,
    /// Covariance of `[translation(3), rotation-vector(3)]`.
    pub covariance: [[f64; 6]; 6],
    /// Monotonic sensor-clock timestamp (ns).
    pub timestamp_ns: u64,
}

impl VisualDelta {
    /// A delta with isotropic translation / rotation standard deviations.
    pub fn isotropic(
        delta_position: Vec3,
        delta_orientation: Quaternion,
        translation_sigma_m: f64,
        rotation_sigma_rad: f64,
        timestamp_ns: u64,
    ) -> Self {
        let mut covariance = [[0.0; 6]; 6];
        for (i, row) in covariance.iter_mut().enumerate() {
            row[i] = if i < 3 {
                translation_sigma_m * translation_sigma_m
            } else {
                rotation_sigma_rad * rotation_sigma_rad
            };
        }
        Self {
            delta_position,
            delta_orientation,
            covariance,
            timestamp_ns,
        }
    }

    /// Finite values and a strictly positive covariance diagonal.
    pub fn is_well_formed(&self) -> bool {
        self.delta_position.is_finite()
            && self.delta_orientation.is_finite()
            && self.delta_orientation.norm() > 1e-6
            && self.covariance.iter().flatten().all(|c| c.is_finite())
            && (0..6).all(|i| self.covariance[i][i] > 0.0)
    }
}
