//! Pose Fusion Engine.
//!
//! An error-state extended Kalman filter that combines three streams arriving
//! at different rates into one [`Pose3D`]:
//!
//! - **IMU** (≤ 100 Hz) – strap-down prediction. Orientation comes from the
//!   [`OrientationIntegrator`]; position and velocity are propagated with the
//!   gravity-free acceleration.
//! - **Visual odometry** (10–30 Hz) – relative motion since the previous
//!   visual frame, composed onto the pose held at that frame and applied as a
//!   measurement of position and orientation error. The pose at that frame is
//!   treated as fully correlated with the current one, so only the
//!   uncertainty accumulated since then can be corrected away:
//!   `D = P − P_ref`.
//! - **GPS** (≈ 1 Hz) – absolute position, only once a
//!   [`FrameTransform`] ties the local map to the globe.
//!
//! The filter state is `[p(3), v(3), δθ(3)]`; the nominal orientation lives in
//! the integrator and the error `δθ` is folded back into it after every
//! correction:
//!
//! ```text
//! predict:  p += v·dt + ½a·dt²     v += a·dt      P ← F P Fᵀ + Q
//! correct:  K = D Hᵀ (H D Hᵀ + R)⁻¹                 (D = P for GPS)
//!           P ← P_ref + (I − K H) D (I − K H)ᵀ + K R Kᵀ   (Joseph form)
//! ```
//!
//! Every rejected input is logged and leaves the state untouched. Three
//! rejections in a row flag tracking as lost until an input is accepted.
//!
//! # Example
//!
//! ```rust
//! use wayfind_perception::fusion::{FusionConfig, PoseFusionEngine};
//! use wayfind_types::{ImuSample, Vec3};
//!
//! let mut engine = PoseFusionEngine::new(FusionConfig::default());
//! let handle = engine.handle();
//!
//! let still = Vec3::new(0.0, 9.806_65, 0.0);
//! engine.ingest_imu(&ImuSample::new(Vec3::zero(), still, 0)).unwrap();
//! engine.ingest_imu(&ImuSample::new(Vec3::zero(), still, 10_000_000)).unwrap();
//!
//! let pose = handle.current_pose();
//! assert_eq!(pose.timestamp_ns, 10_000_000);
//! assert!(pose.position.distance_to(wayfind_types::Position::origin()) < 1e-6);
//! ```

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3, SMatrix, Vector3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wayfind_types::geo::FixQuality;
use wayfind_types::{
    GeoCoordinate, ImuSample, NANOS_PER_SEC, NavError, Pose3D, Position, Quaternion, Vec3,
    VisualDelta, elapsed_secs,
};

use crate::anchor::FrameTransform;
use crate::imu::{ImuConfig, OrientationIntegrator};

type Matrix9 = SMatrix<f64, 9, 9>;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Noise model and acceptance thresholds of the fusion filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub imu: ImuConfig,
    /// Accelerometer white-noise density σa (m/s²/√Hz).
    pub accel_noise: f64,
    /// Gyroscope white-noise density σg (rad/s/√Hz).
    pub gyro_noise: f64,
    /// Initial 1-σ position uncertainty (m).
    pub initial_position_sigma_m: f64,
    pub initial_velocity_sigma_m_s: f64,
    pub initial_attitude_sigma_rad: f64,
    /// Largest translation a single visual delta may report (m).
    pub max_visual_step_m: f64,
    /// Smallest GPS 1-σ accuracy used in the measurement noise (m).
    pub min_gps_accuracy_m: f64,
    /// Age after which a GPS fix is ignored and, with none applied for as
    /// long, the pose is reported as GPS-degraded (s).
    pub gps_staleness_secs: f64,
    /// Tracking quality below which [`PoseFusionEngine::check_tracking`]
    /// reports [`NavError::TrackingLost`].
    pub min_tracking_quality: f64,
    /// Consecutive rejected inputs that escalate to tracking lost.
    pub max_consecutive_rejections: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            imu: ImuConfig::default(),
            accel_noise: 0.5,
            gyro_noise: 0.01,
            initial_position_sigma_m: 0.05,
            initial_velocity_sigma_m_s: 0.05,
            initial_attitude_sigma_rad: 0.02,
            max_visual_step_m: 2.0,
            min_gps_accuracy_m: 0.5,
            gps_staleness_secs: 10.0,
            min_tracking_quality: 0.2,
            max_consecutive_rejections: 3,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Published state
// ────────────────────────────────────────────────────────────────────────────

/// Everything a reader of the fusion engine may look at, copied out in one
/// lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedState {
    pub pose: Pose3D,
    /// [`Pose3D::tracking_quality`] of `pose`.
    pub tracking_quality: f64,
    /// Quality below threshold or too many consecutive rejections.
    pub tracking_lost: bool,
    /// No GPS fix applied within the staleness window.
    pub gps_degraded: bool,
    /// Latest compass heading, radians clockwise from magnetic north.
    pub heading_rad: Option<f64>,
    /// Local ↔ global transform currently installed in the engine.
    pub frame_transform: Option<FrameTransform>,
}

impl Default for FusedState {
    fn default() -> Self {
        Self {
            pose: Pose3D::identity(),
            tracking_quality: 1.0,
            tracking_lost: false,
            gps_degraded: true,
            heading_rad: None,
            frame_transform: None,
        }
    }
}

/// Cloneable read-only view onto the engine's latest [`FusedState`].
///
/// The lock is held only for the copy.
#[derive(Debug, Clone, Default)]
pub struct PoseHandle {
    inner: Arc<RwLock<FusedState>>,
}

impl PoseHandle {
    pub fn current_pose(&self) -> Pose3D {
        self.inner.read().pose
    }

    pub fn fused_state(&self) -> FusedState {
        *self.inner.read()
    }

    pub fn tracking_quality(&self) -> f64 {
        self.inner.read().tracking_quality
    }

    fn publish(&self, state: FusedState) {
        *self.inner.write() = state;
    }
}

/// Result of offering a GPS fix to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsOutcome {
    Applied,
    Withheld(GpsWithheld),
}

/// Why a well-formed GPS fix was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsWithheld {
    NoFix,
    /// Older than the staleness window relative to the filter clock.
    Stale,
    /// No map anchor yet ties the local frame to the globe.
    NoTransform,
}

// ────────────────────────────────────────────────────────────────────────────
// PoseFusionEngine
// ────────────────────────────────────────────────────────────────────────────

/// Error-state EKF over `[position, velocity, orientation error]`.
///
/// The engine is the only writer of the pose; it is owned by the fusion
/// worker and read through [`PoseHandle`]s.
#[derive(Debug)]
pub struct PoseFusionEngine {
    config: FusionConfig,
    imu: OrientationIntegrator,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    covariance: Matrix9,
    /// Filter clock: timestamp of the newest accepted input (ns).
    clock_ns: u64,
    last_imu_ns: Option<u64>,
    /// Pose at the previous visual update, onto which the next delta is
    /// composed.
    visual_ref_position: Vector3<f64>,
    visual_ref_orientation: Quaternion,
    visual_ref_covariance: Matrix9,
    frame_transform: Option<FrameTransform>,
    last_gps_ns: Option<u64>,
    consecutive_rejections: u32,
    handle: PoseHandle,
}

impl PoseFusionEngine {
    /// Create an engine at the local-map origin with identity orientation.
    pub fn new(config: FusionConfig) -> Self {
        let covariance = initial_covariance(&config);
        let mut engine = Self {
            imu: OrientationIntegrator::new(config.imu.clone()),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            covariance,
            clock_ns: 0,
            last_imu_ns: None,
            visual_ref_position: Vector3::zeros(),
            visual_ref_orientation: Quaternion::identity(),
            visual_ref_covariance: covariance,
            frame_transform: None,
            last_gps_ns: None,
            consecutive_rejections: 0,
            handle: PoseHandle::default(),
            config,
        };
        engine.publish();
        engine
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// A new reader onto this engine's published state.
    pub fn handle(&self) -> PoseHandle {
        self.handle.clone()
    }

    /// Snapshot of the current pose.
    pub fn current_pose(&self) -> Pose3D {
        Pose3D {
            position: Position::new(self.position.x, self.position.y, self.position.z),
            orientation: self.imu.orientation(),
            velocity: Vec3::new(self.velocity.x, self.velocity.y, self.velocity.z),
            covariance: to_array(&self.covariance),
            timestamp_ns: self.clock_ns,
        }
    }

    pub fn fused_state(&self) -> FusedState {
        let pose = self.current_pose();
        let tracking_quality = pose.tracking_quality();
        FusedState {
            pose,
            tracking_quality,
            tracking_lost: self.is_tracking_lost(tracking_quality),
            gps_degraded: self.gps_degraded(),
            heading_rad: self.imu.heading_rad(),
            frame_transform: self.frame_transform,
        }
    }

    /// The current pose, or [`NavError::TrackingLost`] when it cannot be
    /// trusted for guidance.
    pub fn check_tracking(&self) -> Result<Pose3D, NavError> {
        let pose = self.current_pose();
        if self.is_tracking_lost(pose.tracking_quality()) {
            Err(NavError::TrackingLost)
        } else {
            Ok(pose)
        }
    }

    /// `true` when no GPS fix has been applied within the staleness window.
    pub fn gps_degraded(&self) -> bool {
        match self.last_gps_ns {
            Some(t) => elapsed_secs(t, self.clock_ns) > self.config.gps_staleness_secs,
            None => true,
        }
    }

    /// Install (or clear) the local ↔ global transform used by
    /// [`PoseFusionEngine::correct_gps`].
    pub fn set_frame_transform(&mut self, transform: Option<FrameTransform>) {
        self.frame_transform = transform;
        self.publish();
    }

    /// Re-localise: adopt `pose` wholesale, e.g. after the visual front-end
    /// switched maps. The transform is cleared because it belonged to the
    /// previous map.
    pub fn reset(&mut self, pose: Pose3D) {
        self.position = Vector3::new(pose.position.x, pose.position.y, pose.position.z);
        self.velocity = Vector3::new(pose.velocity.x, pose.velocity.y, pose.velocity.z);
        self.imu.reset(pose.orientation);
        self.covariance = initial_covariance(&self.config);
        self.clock_ns = pose.timestamp_ns;
        self.last_imu_ns = None;
        self.visual_ref_position = self.position;
        self.visual_ref_orientation = self.imu.orientation();
        self.visual_ref_covariance = self.covariance;
        self.frame_transform = None;
        self.consecutive_rejections = 0;
        info!("fusion engine re-localised");
        self.publish();
    }

    // ── IMU ─────────────────────────────────────────────────────────────────

    /// Feed one raw IMU sample. The first sample only starts the clock; later
    /// ones are integrated over the gap to their predecessor.
    pub fn ingest_imu(&mut self, sample: &ImuSample) -> Result<(), NavError> {
        let Some(last) = self.last_imu_ns else {
            if !sample.is_finite() {
                return Err(self.reject(NavError::sensor_fault("imu", "non-finite sample")));
            }
            self.last_imu_ns = Some(sample.timestamp_ns);
            self.clock_ns = self.clock_ns.max(sample.timestamp_ns);
            self.publish();
            return Ok(());
        };
        let dt = elapsed_secs(last, sample.timestamp_ns);
        if dt > self.config.imu.max_dt_secs {
            // Gap in the stream: restart integration from this sample.
            self.last_imu_ns = Some(sample.timestamp_ns);
        }
        self.predict_sample(sample, dt)?;
        self.last_imu_ns = Some(sample.timestamp_ns);
        Ok(())
    }

    /// Propagate the state by `dt` seconds using body-frame angular rate and
    /// specific force.
    pub fn predict(&mut self, gyro: Vec3, accel: Vec3, dt: f64) -> Result<(), NavError> {
        let timestamp_ns = if dt.is_finite() && dt > 0.0 {
            self.clock_ns.saturating_add((dt * NANOS_PER_SEC) as u64)
        } else {
            self.clock_ns
        };
        self.predict_sample(&ImuSample::new(gyro, accel, timestamp_ns), dt)
    }

    fn predict_sample(&mut self, sample: &ImuSample, dt: f64) -> Result<(), NavError> {
        let estimate = match self.imu.update(sample, dt) {
            Ok(estimate) => estimate,
            Err(e) => return Err(self.reject(e)),
        };

        let a = to_vector(estimate.linear_accel);
        self.position += self.velocity * dt + a * (0.5 * dt * dt);
        self.velocity += a * dt;

        let rotation = rotation_matrix(estimate.orientation);
        let mut f = Matrix9::identity();
        f.fixed_view_mut::<3, 3>(0, 3).copy_from(&(Matrix3::identity() * dt));
        f.fixed_view_mut::<3, 3>(3, 6)
            .copy_from(&(-rotation * skew(sample.accel) * dt));
        f.fixed_view_mut::<3, 3>(6, 6)
            .copy_from(&(Matrix3::identity() - skew(sample.gyro) * dt));

        let sa2 = self.config.accel_noise.powi(2);
        let sg2 = self.config.gyro_noise.powi(2);
        let mut q = Matrix9::zeros();
        for i in 0..3 {
            q[(i, i)] = sa2 * dt.powi(3) / 3.0;
            q[(i, i + 3)] = sa2 * dt.powi(2) / 2.0;
            q[(i + 3, i)] = sa2 * dt.powi(2) / 2.0;
            q[(i + 3, i + 3)] = sa2 * dt;
            q[(i + 6, i + 6)] = sg2 * dt;
        }

        self.covariance = symmetrize(f * self.covariance * f.transpose() + q);
        self.clock_ns = self.clock_ns.max(sample.timestamp_ns);
        debug!(dt, position = ?self.position, "imu prediction");
        self.accept();
        Ok(())
    }

    // ── Visual odometry ─────────────────────────────────────────────────────

    /// Apply a relative motion estimate from the visual front-end.
    pub fn correct_visual(&mut self, delta: &VisualDelta) -> Result<(), NavError> {
        if !delta.is_well_formed() {
            return Err(self.reject(NavError::sensor_fault("visual", "malformed delta")));
        }
        let step = delta.delta_position.norm();
        if step > self.config.max_visual_step_m {
            return Err(self.reject(NavError::sensor_fault(
                "visual",
                format!("translation {step:.2} m exceeds plausible step"),
            )));
        }

        let ref_rotation = rotation_matrix(self.visual_ref_orientation);
        let measured_position =
            self.visual_ref_position + ref_rotation * to_vector(delta.delta_position);
        let measured_orientation = self
            .visual_ref_orientation
            .mul(delta.delta_orientation.normalized())
            .normalized();

        let orientation = self.imu.orientation();
        let position_residual = measured_position - self.position;
        let attitude_residual = orientation.conjugate().mul(measured_orientation).to_rotation_vector();

        let mut h = DMatrix::zeros(6, 9);
        let mut residual = DVector::zeros(6);
        for i in 0..3 {
            h[(i, i)] = 1.0;
            h[(i + 3, i + 6)] = 1.0;
            residual[i] = position_residual[i];
        }
        residual[3] = attitude_residual.x;
        residual[4] = attitude_residual.y;
        residual[5] = attitude_residual.z;

        // Translation noise is given in the reference body frame.
        let mut r = DMatrix::from_fn(6, 6, |i, j| delta.covariance[i][j]);
        let r_tt = ref_rotation * r.fixed_view::<3, 3>(0, 0) * ref_rotation.transpose();
        let r_tr = ref_rotation * r.fixed_view::<3, 3>(0, 3);
        r.view_mut((0, 0), (3, 3)).copy_from(&r_tt);
        r.view_mut((0, 3), (3, 3)).copy_from(&r_tr);
        r.view_mut((3, 0), (3, 3)).copy_from(&r_tr.transpose());

        let baseline = self.visual_ref_covariance;
        let dx = match self.kalman_update(&h, &residual, &r, Some(&baseline), "visual") {
            Ok(dx) => dx,
            Err(e) => return Err(self.reject(e)),
        };
        self.apply_error_state(&dx);

        self.visual_ref_position = self.position;
        self.visual_ref_orientation = self.imu.orientation();
        self.visual_ref_covariance = self.covariance;
        self.clock_ns = self.clock_ns.max(delta.timestamp_ns);
        debug!(position = ?self.position, "visual correction applied");
        self.accept();
        Ok(())
    }

    // ── GPS ─────────────────────────────────────────────────────────────────

    /// Offer an absolute GPS fix with 1-σ horizontal accuracy `accuracy_m`.
    ///
    /// Well-formed fixes that cannot be used are withheld rather than
    /// rejected and do not count towards tracking loss.
    pub fn correct_gps(&mut self, geo: &GeoCoordinate, accuracy_m: f64) -> Result<GpsOutcome, NavError> {
        if !geo.is_valid() || !accuracy_m.is_finite() || accuracy_m < 0.0 {
            return Err(self.reject(NavError::sensor_fault("gps", "invalid fix")));
        }
        if geo.fix_quality == FixQuality::NoFix {
            return Ok(GpsOutcome::Withheld(GpsWithheld::NoFix));
        }
        if elapsed_secs(geo.timestamp_ns, self.clock_ns) > self.config.gps_staleness_secs {
            debug!(fix_ns = geo.timestamp_ns, clock_ns = self.clock_ns, "stale gps fix withheld");
            return Ok(GpsOutcome::Withheld(GpsWithheld::Stale));
        }
        let Some(transform) = self.frame_transform else {
            return Ok(GpsOutcome::Withheld(GpsWithheld::NoTransform));
        };

        let measured = transform.global_to_local(geo);
        let sigma = accuracy_m.max(self.config.min_gps_accuracy_m);
        let vertical_var = match geo.fix_quality {
            FixQuality::Fix3d => (2.0 * sigma).powi(2),
            // Altitude from a 2-D fix is meaningless.
            _ => 1.0e6,
        };

        let mut h = DMatrix::zeros(3, 9);
        for i in 0..3 {
            h[(i, i)] = 1.0;
        }
        let residual = DVector::from_vec(vec![
            measured.x - self.position.x,
            measured.y - self.position.y,
            measured.z - self.position.z,
        ]);
        let r = DMatrix::from_diagonal(&DVector::from_vec(vec![sigma * sigma, vertical_var, sigma * sigma]));

        let dx = match self.kalman_update(&h, &residual, &r, None, "gps") {
            Ok(dx) => dx,
            Err(e) => return Err(self.reject(e)),
        };

        // Keep the next visual delta relative to the corrected pose.
        self.apply_error_state(&dx);
        self.visual_ref_position += Vector3::new(dx[0], dx[1], dx[2]);
        self.visual_ref_orientation = self
            .visual_ref_orientation
            .mul(Quaternion::from_rotation_vector(Vec3::new(dx[6], dx[7], dx[8])))
            .normalized();
        self.visual_ref_covariance = self.covariance;

        self.clock_ns = self.clock_ns.max(geo.timestamp_ns);
        self.last_gps_ns = Some(self.clock_ns);
        debug!(accuracy_m, position = ?self.position, "gps correction applied");
        self.accept();
        Ok(GpsOutcome::Applied)
    }

    // ── Internals ───────────────────────────────────────────────────────────

    /// Joseph-form measurement update. Returns the error-state correction.
    ///
    /// With a `baseline`, only the covariance accumulated on top of it is
    /// observable (relative measurements); without one this is the standard
    /// absolute update.
    fn kalman_update(
        &mut self,
        h: &DMatrix<f64>,
        residual: &DVector<f64>,
        r: &DMatrix<f64>,
        baseline: Option<&Matrix9>,
        source: &str,
    ) -> Result<DVector<f64>, NavError> {
        let base = baseline.copied().unwrap_or_else(Matrix9::zeros);
        let d = symmetrize(self.covariance - base);
        let d = DMatrix::from_iterator(9, 9, d.iter().copied());
        let s = h * &d * h.transpose() + r;
        let s_inv = s
            .try_inverse()
            .ok_or_else(|| NavError::sensor_fault(source, "singular innovation covariance"))?;
        let k = &d * h.transpose() * s_inv;
        let dx = &k * residual;
        if dx.iter().any(|v| !v.is_finite()) {
            return Err(NavError::sensor_fault(source, "non-finite correction"));
        }
        let i_kh = DMatrix::identity(9, 9) - &k * h;
        let updated = &i_kh * &d * i_kh.transpose() + &k * r * k.transpose();
        self.covariance = symmetrize(base + Matrix9::from_iterator(updated.iter().copied()));
        Ok(dx)
    }

    fn apply_error_state(&mut self, dx: &DVector<f64>) {
        self.position += Vector3::new(dx[0], dx[1], dx[2]);
        self.velocity += Vector3::new(dx[3], dx[4], dx[5]);
        self.imu.apply_correction(Vec3::new(dx[6], dx[7], dx[8]));
    }

    fn is_tracking_lost(&self, quality: f64) -> bool {
        self.consecutive_rejections >= self.config.max_consecutive_rejections
            || quality < self.config.min_tracking_quality
    }

    fn reject(&mut self, err: NavError) -> NavError {
        self.consecutive_rejections = self.consecutive_rejections.saturating_add(1);
        warn!(error = %err, rejections = self.consecutive_rejections, "fusion input rejected");
        if self.consecutive_rejections == self.config.max_consecutive_rejections {
            warn!("too many consecutive rejections; tracking lost");
        }
        self.publish();
        err
    }

    fn accept(&mut self) {
        if self.consecutive_rejections >= self.config.max_consecutive_rejections {
            info!("fusion input accepted again; tracking resumed");
        }
        self.consecutive_rejections = 0;
        self.publish();
    }

    fn publish(&self) {
        self.handle.publish(self.fused_state());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Matrix helpers
// ────────────────────────────────────────────────────────────────────────────

fn initial_covariance(config: &FusionConfig) -> Matrix9 {
    let mut p = Matrix9::zeros();
    for i in 0..3 {
        p[(i, i)] = config.initial_position_sigma_m.powi(2);
        p[(i + 3, i + 3)] = config.initial_velocity_sigma_m_s.powi(2);
        p[(i + 6, i + 6)] = config.initial_attitude_sigma_rad.powi(2);
    }
    p
}

fn symmetrize(p: Matrix9) -> Matrix9 {
    (p + p.transpose()) * 0.5
}

fn to_vector(v: Vec3) -> Vector3<f64> {
    Vector3::new(v.x, v.y, v.z)
}

fn to_array(p: &Matrix9) -> [[f64; 9]; 9] {
    let mut out = [[0.0; 9]; 9];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = p[(i, j)];
        }
    }
    out
}

fn rotation_matrix(q: Quaternion) -> Matrix3<f64> {
    let m = q.to_rotation_matrix();
    Matrix3::new(
        m[0][0], m[0][1], m[0][2], //
        m[1][0], m[1][1], m[1][2], //
        m[2][0], m[2][1], m[2][2],
    )
}

/// Cross-product matrix: `skew(a) * b == a × b`.
fn skew(v: Vec3) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wayfind_types::STANDARD_GRAVITY;

    const STILL: Vec3 = Vec3::new(0.0, STANDARD_GRAVITY, 0.0);
    const TICK_NS: u64 = 10_000_000;

    fn transform_at(reference: GeoCoordinate) -> FrameTransform {
        FrameTransform {
            reference,
            yaw_rad: 0.0,
            translation: Vec3::zero(),
            residual_m: 0.0,
            reference_accuracy_m: 1.0,
            anchor_count: 1,
        }
    }

    fn run_still(engine: &mut PoseFusionEngine, samples: u64) {
        let start = engine.current_pose().timestamp_ns;
        for i in 0..samples {
            engine
                .ingest_imu(&ImuSample::new(Vec3::zero(), STILL, start + i * TICK_NS))
                .unwrap();
        }
    }

    #[test]
    fn new_engine_publishes_identity_pose() {
        let engine = PoseFusionEngine::new(FusionConfig::default());
        let state = engine.handle().fused_state();
        assert_eq!(state.pose.position, Position::origin());
        assert!(!state.tracking_lost);
        assert!(state.gps_degraded);
    }

    #[test]
    fn first_imu_sample_only_starts_the_clock() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        let before = engine.current_pose().covariance;
        engine
            .ingest_imu(&ImuSample::new(Vec3::zero(), STILL, 5 * TICK_NS))
            .unwrap();
        let pose = engine.current_pose();
        assert_eq!(pose.timestamp_ns, 5 * TICK_NS);
        assert_eq!(pose.covariance, before);
    }

    #[test]
    fn stationary_prediction_never_shrinks_position_uncertainty() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        let mut previous = engine.current_pose().position_covariance_trace();
        for i in 0..300 {
            engine
                .ingest_imu(&ImuSample::new(Vec3::zero(), STILL, i * TICK_NS))
                .unwrap();
            let trace = engine.current_pose().position_covariance_trace();
            assert!(trace >= previous - 1e-15, "step {i}: {trace} < {previous}");
            previous = trace;
        }
        assert!(engine.current_pose().position.distance_to(Position::origin()) < 1e-6);
    }

    #[test]
    fn predict_integrates_linear_acceleration() {
        // Without tilt correction the push is not mistaken for a lean.
        let config = FusionConfig {
            imu: ImuConfig {
                kp: 0.0,
                ..ImuConfig::default()
            },
            ..FusionConfig::default()
        };
        let mut engine = PoseFusionEngine::new(config);
        // Push along +X at 1 m/s² for one second.
        for _ in 0..100 {
            engine
                .predict(Vec3::zero(), Vec3::new(1.0, STANDARD_GRAVITY, 0.0), 0.01)
                .unwrap();
        }
        let pose = engine.current_pose();
        assert!((pose.position.x - 0.5).abs() < 1e-6, "x = {}", pose.position.x);
        assert!((pose.velocity.x - 1.0).abs() < 1e-6);
        assert_eq!(pose.timestamp_ns, 100 * TICK_NS);
    }

    #[test]
    fn visual_delta_pulls_position() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        run_still(&mut engine, 50);
        let delta = VisualDelta::isotropic(
            Vec3::new(0.0, 0.0, -1.0),
            Quaternion::identity(),
            0.001,
            0.001,
            engine.current_pose().timestamp_ns,
        );
        engine.correct_visual(&delta).unwrap();
        let pose = engine.current_pose();
        assert!((pose.position.z + 1.0).abs() < 0.01, "z = {}", pose.position.z);

        // A second delta is relative to the first.
        run_still(&mut engine, 10);
        engine.correct_visual(&delta).unwrap();
        assert!((engine.current_pose().position.z + 2.0).abs() < 0.02);
    }

    #[test]
    fn visual_delta_is_expressed_in_the_reference_body_frame() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        let left = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), std::f64::consts::FRAC_PI_2);
        engine.reset(Pose3D {
            orientation: left,
            ..Pose3D::identity()
        });
        run_still(&mut engine, 10);
        // One metre "forward" while facing -X.
        let delta = VisualDelta::isotropic(Vec3::new(0.0, 0.0, -1.0), Quaternion::identity(), 0.001, 0.001, 1);
        engine.correct_visual(&delta).unwrap();
        let p = engine.current_pose().position;
        assert!((p.x + 1.0).abs() < 0.02, "p = {p:?}");
        assert!(p.z.abs() < 0.02);
    }

    #[test]
    fn visual_delta_corrects_heading() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        run_still(&mut engine, 10);
        let turn = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.1);
        let delta = VisualDelta::isotropic(Vec3::zero(), turn, 0.01, 0.0001, 1);
        engine.correct_visual(&delta).unwrap();
        let q = engine.current_pose().orientation;
        let err = q.conjugate().mul(turn).to_rotation_vector().norm();
        assert!(err < 0.01, "err = {err}");
    }

    #[test]
    fn rejected_inputs_leave_state_untouched() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        run_still(&mut engine, 10);
        let before = engine.current_pose();
        let bad = ImuSample::new(Vec3::new(f64::NAN, 0.0, 0.0), STILL, before.timestamp_ns + TICK_NS);
        assert!(matches!(engine.ingest_imu(&bad), Err(NavError::SensorFault { .. })));
        let huge = VisualDelta::isotropic(Vec3::new(50.0, 0.0, 0.0), Quaternion::identity(), 0.01, 0.01, 1);
        assert!(engine.correct_visual(&huge).is_err());
        assert_eq!(engine.current_pose(), before);
    }

    #[test]
    fn three_rejections_lose_tracking_until_an_input_is_accepted() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        run_still(&mut engine, 2);
        let bad = VisualDelta::isotropic(Vec3::new(f64::INFINITY, 0.0, 0.0), Quaternion::identity(), 0.01, 0.01, 1);
        for _ in 0..2 {
            let _ = engine.correct_visual(&bad);
        }
        assert!(engine.check_tracking().is_ok());
        let _ = engine.correct_visual(&bad);
        assert_eq!(engine.check_tracking(), Err(NavError::TrackingLost));
        assert!(engine.handle().fused_state().tracking_lost);

        let t = engine.current_pose().timestamp_ns + TICK_NS;
        engine.ingest_imu(&ImuSample::new(Vec3::zero(), STILL, t)).unwrap();
        assert!(engine.check_tracking().is_ok());
    }

    #[test]
    fn low_quality_reports_tracking_lost() {
        let config = FusionConfig {
            initial_position_sigma_m: 2.0,
            ..FusionConfig::default()
        };
        let engine = PoseFusionEngine::new(config);
        // trace = 12 m² → quality ≈ 0.077
        assert_eq!(engine.check_tracking(), Err(NavError::TrackingLost));
    }

    #[test]
    fn gps_is_withheld_without_transform_fix_or_freshness() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        let reference = GeoCoordinate::new(1.3521, 103.8198, 0.0);

        assert_eq!(
            engine.correct_gps(&reference, 3.0),
            Ok(GpsOutcome::Withheld(GpsWithheld::NoTransform))
        );

        engine.set_frame_transform(Some(transform_at(reference)));
        let mut no_fix = reference;
        no_fix.fix_quality = FixQuality::NoFix;
        assert_eq!(
            engine.correct_gps(&no_fix, 3.0),
            Ok(GpsOutcome::Withheld(GpsWithheld::NoFix))
        );

        run_still(&mut engine, 1);
        engine
            .ingest_imu(&ImuSample::new(Vec3::zero(), STILL, 11_000_000_000))
            .ok();
        engine
            .ingest_imu(&ImuSample::new(Vec3::zero(), STILL, 11_010_000_000))
            .unwrap();
        assert_eq!(
            engine.correct_gps(&reference.with_timestamp(0), 3.0),
            Ok(GpsOutcome::Withheld(GpsWithheld::Stale))
        );
        assert!(engine.gps_degraded());
    }

    #[test]
    fn gps_fix_pulls_position_through_the_transform() {
        let config = FusionConfig {
            initial_position_sigma_m: 10.0,
            min_tracking_quality: 0.0,
            ..FusionConfig::default()
        };
        let mut engine = PoseFusionEngine::new(config);
        let reference = GeoCoordinate::new(1.3521, 103.8198, 0.0);
        engine.set_frame_transform(Some(transform_at(reference)));

        // 20 m north of the reference is local (0, 0, -20).
        let north = wayfind_types::geo::destination(&reference, 0.0, 20.0);
        assert_eq!(engine.correct_gps(&north, 1.0), Ok(GpsOutcome::Applied));
        let p = engine.current_pose().position;
        assert!((p.z + 20.0).abs() < 0.5, "p = {p:?}");
        assert!(p.x.abs() < 0.5);
        assert!(!engine.gps_degraded());
        assert!(!engine.handle().fused_state().gps_degraded);
    }

    #[test]
    fn gps_degrades_after_staleness_window() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        let reference = GeoCoordinate::new(1.3521, 103.8198, 0.0);
        engine.set_frame_transform(Some(transform_at(reference)));
        assert_eq!(engine.correct_gps(&reference, 1.0), Ok(GpsOutcome::Applied));
        assert!(!engine.gps_degraded());
        for i in 0..=1100 {
            engine
                .predict(Vec3::zero(), STILL, 0.01)
                .unwrap_or_else(|e| panic!("step {i}: {e}"));
        }
        assert!(engine.gps_degraded());
    }

    #[test]
    fn imu_gap_restarts_integration() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        engine.ingest_imu(&ImuSample::new(Vec3::zero(), STILL, 0)).unwrap();
        assert!(engine.ingest_imu(&ImuSample::new(Vec3::zero(), STILL, 2_000_000_000)).is_err());
        engine
            .ingest_imu(&ImuSample::new(Vec3::zero(), STILL, 2_010_000_000))
            .unwrap();
        assert_eq!(engine.current_pose().timestamp_ns, 2_010_000_000);
    }

    #[test]
    fn handle_sees_every_accepted_update() {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        let handle = engine.handle();
        run_still(&mut engine, 3);
        assert_eq!(handle.current_pose(), engine.current_pose());
        assert!(handle.tracking_quality() > 0.9);
    }

    #[test]
    fn config_section_parses_with_defaults() {
        let cfg: FusionConfig = toml::from_str("gps_staleness_secs = 5.0\n[imu]\nkp = 1.0\n").unwrap();
        assert_eq!(cfg.gps_staleness_secs, 5.0);
        assert_eq!(cfg.imu.kp, 1.0);
        assert_eq!(cfg.max_consecutive_rejections, 3);
    }
}
