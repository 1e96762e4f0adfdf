//! `wayfind-perception` – turns raw motion sensors into one trustworthy pose.
//!
//! # Modules
//!
//! - [`imu`] – [`OrientationIntegrator`][imu::OrientationIntegrator]:
//!   complementary (Mahony-style) filter producing orientation, gravity-free
//!   linear acceleration and a tilt-compensated compass heading at IMU rate.
//! - [`fusion`] – [`PoseFusionEngine`][fusion::PoseFusionEngine]: error-state
//!   EKF fusing IMU prediction, relative visual-odometry corrections and
//!   absolute GPS corrections into a [`Pose3D`][wayfind_types::Pose3D] with
//!   covariance. Readers observe it through a cloneable
//!   [`PoseHandle`][fusion::PoseHandle].
//! - [`anchor`] – [`MapAnchorStore`][anchor::MapAnchorStore]: collects
//!   simultaneous pose/GPS pairs and derives the
//!   [`FrameTransform`][anchor::FrameTransform] that is the only way to cross
//!   between the local and the global frame.

pub mod anchor;
pub mod fusion;
pub mod imu;

pub use anchor::{AnchorConfig, FrameTransform, MapAnchorStore};
pub use fusion::{FusedState, FusionConfig, GpsOutcome, GpsWithheld, PoseFusionEngine, PoseHandle};
pub use imu::{ImuConfig, OrientationEstimate, OrientationIntegrator};
