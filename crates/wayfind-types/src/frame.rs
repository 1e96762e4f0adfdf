//! Local-frame geometry.
//!
//! The local frame is the one maintained by the visual-inertial front-end for
//! the currently active map. It is right-handed with `+Y` up; a device with
//! identity orientation looks along `-Z` with `+X` to its right. The same
//! convention is used for the audio listener, so a body-frame direction can be
//! handed to the renderer without re-mapping axes.
//!
//! # Example
//!
//! ```rust
//! use wayfind_types::{Position, Quaternion, Vec3};
//!
//! // A quarter turn to the left (positive rotation about +Y).
//! let q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), std::f64::consts::FRAC_PI_2);
//! let forward = q.rotate(Vec3::new(0.0, 0.0, -1.0));
//! assert!((forward.x + 1.0).abs() < 1e-9);
//!
//! let a = Position::new(0.0, 0.0, 0.0);
//! let b = Position::new(3.0, 0.0, -4.0);
//! assert!((a.distance_to(b) - 5.0).abs() < 1e-12);
//! ```

use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A free 3-D vector (velocities, displacements, sensor axes).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near-)zero vector.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if n > 1e-12 && n.is_finite() {
            Some(self * (1.0 / n))
        } else {
            None
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Position
// ────────────────────────────────────────────────────────────────────────────

/// A point in the active local map frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The local map origin.
    pub const fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Displacement from `self` to `other`.
    pub fn offset_to(self, other: Position) -> Vec3 {
        Vec3::new(other.x - self.x, other.y - self.y, other.z - self.z)
    }

    pub fn translated(self, v: Vec3) -> Position {
        Position::new(self.x + v.x, self.y + v.y, self.z + v.z)
    }

    /// Straight-line 3-D distance.
    pub fn distance_to(self, other: Position) -> f64 {
        self.offset_to(other).norm()
    }

    pub fn as_vec3(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn from_vec3(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }

    pub fn is_finite(self) -> bool {
        self.as_vec3().is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion rotating body-frame vectors into the local frame
/// (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a quaternion. The caller is responsible for providing a unit
    /// quaternion (|q| = 1); use [`Quaternion::normalized`] otherwise.
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle_rad` about `axis` (right-hand rule). A zero axis
    /// yields the identity.
    pub fn from_axis_angle(axis: Vec3, angle_rad: f64) -> Self {
        match axis.normalized() {
            Some(u) => {
                let half = 0.5 * angle_rad;
                let s = half.sin();
                Self::new(half.cos(), u.x * s, u.y * s, u.z * s)
            }
            None => Self::identity(),
        }
    }

    /// Exponential map of a rotation vector (axis × angle, radians).
    pub fn from_rotation_vector(v: Vec3) -> Self {
        let angle = v.norm();
        if angle < 1e-12 {
            // First-order expansion keeps tiny increments from vanishing.
            return Self::new(1.0, 0.5 * v.x, 0.5 * v.y, 0.5 * v.z).normalized();
        }
        Self::from_axis_angle(v, angle)
    }

    /// Logarithmic map: the rotation vector of the shortest equivalent
    /// rotation.
    pub fn to_rotation_vector(self) -> Vec3 {
        let q = if self.w < 0.0 { self.scaled(-1.0) } else { self };
        let v = Vec3::new(q.x, q.y, q.z);
        let s = v.norm();
        if s < 1e-12 {
            return v * 2.0;
        }
        let angle = 2.0 * s.atan2(q.w);
        v * (angle / s)
    }

    /// Hamilton product: `self` applied after `rhs`.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Re-normalise to unit length; degenerate input collapses to identity.
    pub fn normalized(self) -> Self {
        let n = self.norm();
        if n > 1e-12 && n.is_finite() {
            self.scaled(1.0 / n)
        } else {
            Self::identity()
        }
    }

    /// Rotate a body-frame vector into the local frame: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let r = self.mul(p).mul(self.conjugate());
        Vec3::new(r.x, r.y, r.z)
    }

    /// Rotate a local-frame vector into the body frame.
    pub fn inverse_rotate(self, v: Vec3) -> Vec3 {
        self.conjugate().rotate(v)
    }

    /// Row-major rotation matrix equivalent to [`Quaternion::rotate`].
    pub fn to_rotation_matrix(self) -> [[f64; 3]; 3] {
        let Self { w, x, y, z } = self;
        [
            [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z), 2.0 * (x * z + w * y)],
            [2.0 * (x * y + w * z), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x)],
            [2.0 * (x * z - w * y), 2.0 * (y * z + w * x), 1.0 - 2.0 * (x * x + y * y)],
        ]
    }

    pub fn is_finite(self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    fn scaled(self, k: f64) -> Self {
        Self::new(self.w * k, self.x * k, self.y * k, self.z * k)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose3D
// ────────────────────────────────────────────────────────────────────────────

/// 9×9 covariance in fusion-state order: position, velocity, orientation error.
pub type Covariance9 = [[f64; 9]; 9];

/// Body-frame forward axis.
pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, -1.0);

/// Local-frame up axis.
pub const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);

/// Scale (m²) of the position-covariance trace at which tracking quality
/// drops to one half.
const QUALITY_TRACE_SCALE_M2: f64 = 1.0;

/// A snapshot of the fused device pose in the local frame.
///
/// Only the fusion engine produces these; every other component holds a
/// copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3D {
    pub position: Position,
    pub orientation: Quaternion,
    pub velocity: Vec3,
    pub covariance: Covariance9,
    /// Monotonic sensor-clock timestamp (ns).
    pub timestamp_ns: u64,
}

impl Default for Pose3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose3D {
    /// Origin pose with identity orientation and zero covariance.
    pub fn identity() -> Self {
        Self {
            position: Position::origin(),
            orientation: Quaternion::identity(),
            velocity: Vec3::zero(),
            covariance: [[0.0; 9]; 9],
            timestamp_ns: 0,
        }
    }

    /// Identity pose placed at `position`, mostly useful for tests and for
    /// seeding anchors.
    pub fn at(position: Position, timestamp_ns: u64) -> Self {
        Self {
            position,
            timestamp_ns,
            ..Self::identity()
        }
    }

    /// Trace of the 3×3 position block of the covariance (m²).
    pub fn position_covariance_trace(&self) -> f64 {
        self.covariance[0][0] + self.covariance[1][1] + self.covariance[2][2]
    }

    /// Scalar tracking quality in `(0, 1]`; `1` means perfectly known.
    ///
    /// Non-finite covariance reports `0`.
    pub fn tracking_quality(&self) -> f64 {
        let trace = self.position_covariance_trace();
        if !trace.is_finite() || trace < 0.0 {
            return 0.0;
        }
        1.0 / (1.0 + trace / QUALITY_TRACE_SCALE_M2)
    }

    /// Direction the device is facing, in the local frame.
    pub fn forward(&self) -> Vec3 {
        self.orientation.rotate(FORWARD)
    }

    /// Express a local-frame displacement in the device body frame.
    pub fn to_body(&self, v: Vec3) -> Vec3 {
        self.orientation.inverse_rotate(v)
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.orientation.is_finite()
            && self.velocity.is_finite()
            && self.covariance.iter().flatten().all(|c| c.is_finite())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
