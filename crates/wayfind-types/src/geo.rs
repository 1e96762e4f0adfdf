//! Global frame: GPS fixes and geodesy.
//!
//! Distances use the haversine formula on a spherical Earth and bearings are
//! great-circle initial bearings measured clockwise from true north. For the
//! short ranges a pedestrian covers between anchors, offsets to and from a
//! reference fix use an equirectangular tangent plane (`east`, `north`, `up`).
//!
//! ```rust
//! use wayfind_types::geo::{haversine_m, GeoCoordinate};
//!
//! let a = GeoCoordinate::new(1.3521, 103.8198, 0.0);
//! let b = GeoCoordinate::new(1.3530, 103.8198, 0.0);
//! let d = haversine_m(&a, &b);
//! assert!((d - 100.08).abs() < 0.1);
//! ```

use serde::{Deserialize, Serialize};

use crate::wrap_angle;

/// Mean Earth radius (m).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Receiver-reported fix quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixQuality {
    NoFix,
    Fix2d,
    Fix3d,
}

impl FixQuality {
    /// `true` for any fix that carries a horizontal position.
    pub fn has_position(self) -> bool {
        !matches!(self, FixQuality::NoFix)
    }
}

/// A position on the Earth as reported by the GPS collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    /// 1-σ horizontal accuracy (m).
    pub horizontal_accuracy_m: f64,
    pub fix_quality: FixQuality,
    /// Monotonic sensor-clock timestamp (ns).
    pub timestamp_ns: u64,
}

impl GeoCoordinate {
    /// A perfect 3-D fix at `timestamp_ns = 0`; handy for targets and routes.
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
            horizontal_accuracy_m: 0.0,
            fix_quality: FixQuality::Fix3d,
            timestamp_ns: 0,
        }
    }

    /// A receiver fix with explicit quality metadata.
    pub fn fix(
        latitude_deg: f64,
        longitude_deg: f64,
        altitude_m: f64,
        horizontal_accuracy_m: f64,
        fix_quality: FixQuality,
        timestamp_ns: u64,
    ) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
            horizontal_accuracy_m,
            fix_quality,
            timestamp_ns,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn is_finite(&self) -> bool {
        self.latitude_deg.is_finite()
            && self.longitude_deg.is_finite()
            && self.altitude_m.is_finite()
            && self.horizontal_accuracy_m.is_finite()
    }

    /// Finite, within WGS-84 ranges and with a non-negative accuracy.
    pub fn is_valid(&self) -> bool {
        self.is_finite()
            && (-90.0..=90.0).contains(&self.latitude_deg)
            && (-180.0..=180.0).contains(&self.longitude_deg)
            && self.horizontal_accuracy_m >= 0.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Great-circle helpers
// ────────────────────────────────────────────────────────────────────────────

/// Haversine surface distance between two fixes (m). Altitude is ignored.
pub fn haversine_m(a: &GeoCoordinate, b: &GeoCoordinate) -> f64 {
    let lat1 = a.latitude_deg.to_radians();
    let lat2 = b.latitude_deg.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude_deg - a.longitude_deg).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Great-circle initial bearing from `a` to `b`, radians clockwise from true
/// north in `[0, 2π)`.
pub fn initial_bearing_rad(a: &GeoCoordinate, b: &GeoCoordinate) -> f64 {
    let lat1 = a.latitude_deg.to_radians();
    let lat2 = b.latitude_deg.to_radians();
    let dlon = (b.longitude_deg - a.longitude_deg).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).rem_euclid(std::f64::consts::TAU)
}

/// Point reached travelling `distance_m` from `origin` along `bearing_rad`
/// (clockwise from north). Altitude and metadata are copied from `origin`.
pub fn destination(origin: &GeoCoordinate, bearing_rad: f64, distance_m: f64) -> GeoCoordinate {
    let lat1 = origin.latitude_deg.to_radians();
    let lon1 = origin.longitude_deg.to_radians();
    let delta = distance_m / EARTH_RADIUS_M;
    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * bearing_rad.cos()).asin();
    let lon2 = lon1
        + (bearing_rad.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());
    GeoCoordinate {
        latitude_deg: lat2.to_degrees(),
        longitude_deg: normalize_longitude_deg(lon2.to_degrees()),
        ..*origin
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tangent plane
// ────────────────────────────────────────────────────────────────────────────

/// Offset of a fix from a reference fix in a local tangent plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnuOffset {
    pub east_m: f64,
    pub north_m: f64,
    pub up_m: f64,
}

/// Equirectangular offset of `geo` relative to `reference`. The longitude
/// difference takes the short way round, across the antimeridian if needed.
pub fn enu_offset(reference: &GeoCoordinate, geo: &GeoCoordinate) -> EnuOffset {
    let cos_lat = reference.latitude_deg.to_radians().cos();
    let dlon = wrap_angle((geo.longitude_deg - reference.longitude_deg).to_radians());
    EnuOffset {
        east_m: dlon * EARTH_RADIUS_M * cos_lat,
        north_m: (geo.latitude_deg - reference.latitude_deg).to_radians() * EARTH_RADIUS_M,
        up_m: geo.altitude_m - reference.altitude_m,
    }
}

/// Inverse of [`enu_offset`]. A zero offset reproduces `reference`'s
/// latitude, longitude and altitude exactly.
pub fn from_enu(reference: &GeoCoordinate, offset: EnuOffset) -> GeoCoordinate {
    let cos_lat = reference.latitude_deg.to_radians().cos().max(1e-9);
    GeoCoordinate {
        latitude_deg: reference.latitude_deg + (offset.north_m / EARTH_RADIUS_M).to_degrees(),
        longitude_deg: normalize_longitude_deg(
            reference.longitude_deg + (offset.east_m / (EARTH_RADIUS_M * cos_lat)).to_degrees(),
        ),
        altitude_m: reference.altitude_m + offset.up_m,
        ..*reference
    }
}

/// Fold a longitude back into `[-180, 180]`. In-range values are untouched.
fn normalize_longitude_deg(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        wrap_angle(lon.to_radians()).to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn singapore() -> GeoCoordinate {
        GeoCoordinate::new(1.3521, 103.8198, 0.0)
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert_eq!(haversine_m(&singapore(), &singapore()), 0.0);
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let a = GeoCoordinate::new(0.0, 0.0, 0.0);
        let b = GeoCoordinate::new(1.0, 0.0, 0.0);
        let expected = EARTH_RADIUS_M * 1f64.to_radians();
        assert!((haversine_m(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn bearing_cardinal_directions() {
        let o = GeoCoordinate::new(0.0, 0.0, 0.0);
        let north = GeoCoordinate::new(0.01, 0.0, 0.0);
        let east = GeoCoordinate::new(0.0, 0.01, 0.0);
        let south = GeoCoordinate::new(-0.01, 0.0, 0.0);
        assert!(initial_bearing_rad(&o, &north).abs() < 1e-9);
        assert!((initial_bearing_rad(&o, &east) - FRAC_PI_2).abs() < 1e-9);
        assert!((initial_bearing_rad(&o, &south) - PI).abs() < 1e-9);
    }

    #[test]
    fn destination_inverts_bearing_and_distance() {
        let o = singapore();
        let d = destination(&o, 0.7, 250.0);
        assert!((haversine_m(&o, &d) - 250.0).abs() < 1e-6);
        assert!((initial_bearing_rad(&o, &d) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn zero_enu_offset_is_exact() {
        let r = singapore();
        let g = from_enu(&r, EnuOffset::default());
        assert_eq!(g.latitude_deg, r.latitude_deg);
        assert_eq!(g.longitude_deg, r.longitude_deg);
        assert_eq!(g.altitude_m, r.altitude_m);
    }

    #[test]
    fn enu_roundtrip_and_agrees_with_haversine() {
        let r = singapore();
        let g = destination(&r, 1.2, 80.0);
        let off = enu_offset(&r, &g);
        let horizontal = (off.east_m.powi(2) + off.north_m.powi(2)).sqrt();
        assert!((horizontal - 80.0).abs() < 0.01);
        let back = from_enu(&r, off);
        assert!((back.latitude_deg - g.latitude_deg).abs() < 1e-12);
        assert!((back.longitude_deg - g.longitude_deg).abs() < 1e-12);
    }

    #[test]
    fn validity_checks_ranges() {
        assert!(singapore().is_valid());
        assert!(!GeoCoordinate::new(91.0, 0.0, 0.0).is_valid());
        assert!(!GeoCoordinate::new(f64::NAN, 0.0, 0.0).is_valid());
        assert!(!FixQuality::NoFix.has_position());
        assert!(FixQuality::Fix2d.has_position());
    }

    #[test]
    fn tangent_plane_crosses_the_antimeridian() {
        let west = GeoCoordinate::new(-17.0, 179.9999, 0.0);
        let east = GeoCoordinate::new(-17.0, -179.9999, 0.0);
        let off = enu_offset(&west, &east);
        let expected = haversine_m(&west, &east);
        assert!(off.east_m > 0.0);
        assert!((off.east_m - expected).abs() < 0.01, "east = {}", off.east_m);
        assert!(off.north_m.abs() < 1e-9);

        let back = from_enu(&west, off);
        assert!((back.longitude_deg - east.longitude_deg).abs() < 1e-9, "lon = {}", back.longitude_deg);

        let across = destination(&west, FRAC_PI_2, 100.0);
        assert!(across.longitude_deg < -179.0, "lon = {}", across.longitude_deg);
        assert!((haversine_m(&west, &across) - 100.0).abs() < 0.01);
    }
}
