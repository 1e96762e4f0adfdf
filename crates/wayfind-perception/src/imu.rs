//! IMU Orientation Integrator.
//!
//! Integrates gyroscope rates into an orientation quaternion and bounds the
//! resulting tilt drift with the accelerometer using a Mahony-style
//! complementary correction:
//!
//! ```text
//! v̂   = q⁻¹ · up                (expected "up" in the body frame)
//! e   = â × v̂                   (â: normalised specific force)
//! ω'  = ω + kp · e
//! q  ← q ⊗ exp(ω' · dt)
//! ```
//!
//! The correction is only applied while `|a|` is close to 1 g, i.e. while the
//! accelerometer is dominated by gravity. The magnetometer is never fed back
//! into the quaternion (the local frame belongs to the visual-odometry map and
//! must not jump); it only produces a tilt-compensated compass heading.
//!
//! # Example
//!
//! ```rust
//! use wayfind_perception::imu::{ImuConfig, OrientationIntegrator};
//! use wayfind_types::{ImuSample, Vec3};
//!
//! let mut imu = OrientationIntegrator::new(ImuConfig::default());
//! let sample = ImuSample::new(Vec3::zero(), Vec3::new(0.0, 9.806_65, 0.0), 10_000_000);
//! let est = imu.update(&sample, 0.01).unwrap();
//! // At rest and upright, nothing but gravity is measured.
//! assert!(est.linear_accel.norm() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use tracing::trace;
use wayfind_types::frame::{FORWARD, UP};
use wayfind_types::{ImuSample, NavError, Quaternion, STANDARD_GRAVITY, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning of the orientation integrator and the IMU plausibility gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Proportional gain of the accelerometer tilt correction (1/s).
    pub kp: f64,
    /// Relative deviation of `|a|` from 1 g beyond which the accelerometer is
    /// not trusted for tilt.
    pub accel_gate: f64,
    /// Largest plausible angular rate (rad/s).
    pub max_gyro_rad_s: f64,
    /// Largest plausible specific force (m/s²).
    pub max_accel_m_s2: f64,
    /// Longest integration step accepted (s).
    pub max_dt_secs: f64,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            kp: 0.5,
            accel_gate: 0.2,
            max_gyro_rad_s: 35.0,
            max_accel_m_s2: 16.0 * STANDARD_GRAVITY,
            max_dt_secs: 0.5,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

/// Orientation and motion produced for one IMU sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationEstimate {
    /// Body → local rotation.
    pub orientation: Quaternion,
    /// Local-frame acceleration with gravity removed (m/s²).
    pub linear_accel: Vec3,
    /// Compass heading of the device's forward axis, radians clockwise from
    /// magnetic north in `[0, 2π)`. `None` without a magnetometer sample.
    pub heading_rad: Option<f64>,
    pub timestamp_ns: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// OrientationIntegrator
// ────────────────────────────────────────────────────────────────────────────

/// Complementary orientation filter.
#[derive(Debug, Clone)]
pub struct OrientationIntegrator {
    config: ImuConfig,
    orientation: Quaternion,
    last_heading_rad: Option<f64>,
}

impl OrientationIntegrator {
    /// Start from the identity orientation (device upright, facing `-Z`).
    pub fn new(config: ImuConfig) -> Self {
        Self {
            config,
            orientation: Quaternion::identity(),
            last_heading_rad: None,
        }
    }

    pub fn config(&self) -> &ImuConfig {
        &self.config
    }

    pub fn orientation(&self) -> Quaternion {
        self.orientation
    }

    /// Most recent compass heading, if a magnetometer sample has been seen.
    pub fn heading_rad(&self) -> Option<f64> {
        self.last_heading_rad
    }

    /// Check a sample against the plausibility gates without touching state.
    pub fn validate(&self, sample: &ImuSample, dt: f64) -> Result<(), NavError> {
        let ImuSample { gyro, accel, .. } = *sample;
        if !sample.is_finite() {
            return Err(NavError::sensor_fault("imu", "non-finite sample"));
        }
        if !dt.is_finite() || dt <= 0.0 || dt > self.config.max_dt_secs {
            return Err(NavError::sensor_fault("imu", format!("integration step {dt} s out of range")));
        }
        if gyro.norm() > self.config.max_gyro_rad_s {
            return Err(NavError::sensor_fault("imu", format!("angular rate {:.1} rad/s out of range", gyro.norm())));
        }
        if accel.norm() > self.config.max_accel_m_s2 {
            return Err(NavError::sensor_fault("imu", format!("specific force {:.1} m/s² out of range", accel.norm())));
        }
        Ok(())
    }

    /// Integrate one sample taken `dt` seconds after the previous one.
    ///
    /// Rejected samples leave the orientation untouched.
    pub fn update(&mut self, sample: &ImuSample, dt: f64) -> Result<OrientationEstimate, NavError> {
        self.validate(sample, dt)?;
        let ImuSample {
            gyro,
            accel,
            mag,
            timestamp_ns,
        } = *sample;

        let mut omega = gyro;
        let accel_norm = accel.norm();
        let within_gate = (accel_norm / STANDARD_GRAVITY - 1.0).abs() <= self.config.accel_gate;
        if within_gate && let Some(measured_up) = accel.normalized() {
            let expected_up = self.orientation.inverse_rotate(UP);
            let error = measured_up.cross(expected_up);
            omega = omega + error * self.config.kp;
        }

        self.orientation = self
            .orientation
            .mul(Quaternion::from_rotation_vector(omega * dt))
            .normalized();

        if let Some(m) = mag {
            self.last_heading_rad = compass_heading(self.orientation, m);
        }

        let linear_accel = self.orientation.rotate(accel) - UP * STANDARD_GRAVITY;
        trace!(?omega, ?linear_accel, "imu integrated");

        Ok(OrientationEstimate {
            orientation: self.orientation,
            linear_accel,
            heading_rad: self.last_heading_rad,
            timestamp_ns,
        })
    }

    /// Fold an orientation-error correction (body-frame rotation vector)
    /// estimated by the fusion filter back into the integrator.
    pub fn apply_correction(&mut self, delta_theta: Vec3) {
        if delta_theta.is_finite() {
            self.orientation = self
                .orientation
                .mul(Quaternion::from_rotation_vector(delta_theta))
                .normalized();
        }
    }

    /// Overwrite the orientation, e.g. after re-localisation.
    pub fn reset(&mut self, orientation: Quaternion) {
        self.orientation = orientation.normalized();
    }
}

/// Tilt-compensated heading of the device's forward axis, clockwise from the
/// horizontal component of `mag_body`.
///
/// Returns `None` when either the forward axis or the field is (nearly)
/// vertical.
pub fn compass_heading(orientation: Quaternion, mag_body: Vec3) -> Option<f64> {
    let field = orientation.rotate(mag_body);
    let north = Vec3::new(field.x, 0.0, field.z).normalized()?;
    let forward = orientation.rotate(FORWARD);
    let forward = Vec3::new(forward.x, 0.0, forward.z).normalized()?;
    Some((azimuth(forward) - azimuth(north)).rem_euclid(std::f64::consts::TAU))
}

/// Clockwise angle of a horizontal vector from `-Z`, viewed from above.
fn azimuth(v: Vec3) -> f64 {
    v.x.atan2(-v.z)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
