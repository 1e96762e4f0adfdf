//! `wayfind-types` – shared vocabulary of the Wayfind navigation core.
//!
//! Every other crate in the workspace speaks in these types, so they are kept
//! free of behaviour beyond small, pure helpers.
//!
//! # Modules
//!
//! - [`frame`] – local-frame geometry: [`Vec3`], [`Position`],
//!   [`Quaternion`] and the fused [`Pose3D`] snapshot.
//! - [`geo`] – the global frame: [`GeoCoordinate`], [`FixQuality`] and the
//!   geodesy helpers (haversine, great-circle bearing, tangent-plane offsets).
//! - [`sensors`] – raw sensor samples consumed by the fusion engine.
//! - [`objects`] – remembered [`SpatialObject`]s, their [`QualityFlags`] and
//!   the [`MapAnchor`] pairs that tie a local map to the globe.
//! - [`guidance`] – navigation modes, route waypoints, audio placements and
//!   the [`GuidanceEvent`]s published by the guidance loop.
//! - [`error`] – the [`NavError`] result kinds returned to the command layer.
//!
//! `Position` and `GeoCoordinate` deliberately have no conversion between
//! them. Crossing frames is only possible through the map anchor store in
//! `wayfind-perception`.

pub mod error;
pub mod frame;
pub mod geo;
pub mod guidance;
pub mod objects;
pub mod sensors;

pub use error::NavError;
pub use frame::{Covariance9, Pose3D, Position, Quaternion, Vec3};
pub use geo::{FixQuality, GeoCoordinate};
pub use guidance::{AudioPlacement, AudioRole, GuidanceEvent, NavMode, SessionEndReason, Waypoint};
pub use objects::{MapAnchor, MapId, ObjectId, QualityFlags, SpatialObject};
pub use sensors::{ImuSample, VisualDelta};

/// Standard gravity (m/s²).
pub const STANDARD_GRAVITY: f64 = 9.806_65;

/// Nanoseconds per second, for converting sample timestamps.
pub const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Convert a span between two monotonic nanosecond timestamps into seconds.
///
/// Returns a negative value when `later` precedes `earlier`.
pub fn elapsed_secs(earlier_ns: u64, later_ns: u64) -> f64 {
    (later_ns as i128 - earlier_ns as i128) as f64 / NANOS_PER_SEC
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(rad: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut a = rad % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn elapsed_secs_handles_ordering() {
        assert!((elapsed_secs(0, 1_500_000_000) - 1.5).abs() < 1e-12);
        assert!((elapsed_secs(2_000_000_000, 1_000_000_000) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn wrap_angle_stays_in_range() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-9);
        assert!((wrap_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-9);
        assert!((wrap_angle(0.25) - 0.25).abs() < 1e-12);
        assert!(wrap_angle(-PI) > 0.0);
    }
}
