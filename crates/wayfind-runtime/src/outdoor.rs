//! Outdoor Navigator.
//!
//! Follows a route supplied by the mapping service, waypoint by waypoint.
//! Distances are haversine, bearings are great-circle initial bearings from
//! true north; turning the absolute bearing into a listener-relative one is
//! the guidance loop's job because it needs the device heading.
//!
//! Off-route detection measures the cross-track distance from the user to
//! the nearest remaining route segment (clamped to the segment ends) in a
//! tangent plane centred on the user. Exceeding the threshold continuously
//! for the dwell time raises `off_route`, which the command layer answers by
//! requesting a new route.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wayfind_types::geo::{self, FixQuality};
use wayfind_types::{GeoCoordinate, NavError, Waypoint};

use crate::hysteresis::DwellTimer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutdoorConfig {
    pub waypoint_radius_m: f64,
    pub off_route_threshold_m: f64,
    pub off_route_dwell_secs: u64,
}

impl Default for OutdoorConfig {
    fn default() -> Self {
        Self {
            waypoint_radius_m: 5.0,
            off_route_threshold_m: 20.0,
            off_route_dwell_secs: 10,
        }
    }
}

/// Output of one [`OutdoorNavigator::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutdoorGuidance {
    pub distance_to_waypoint_m: f64,
    /// Great-circle initial bearing to the current waypoint, clockwise from
    /// true north.
    pub bearing_rad: f64,
    pub waypoint_index: usize,
    pub instruction: String,
    /// Distance to the nearest remaining route segment.
    pub cross_track_m: f64,
    pub off_route: bool,
    pub arrived: bool,
}

#[derive(Debug, Clone)]
pub struct OutdoorNavigator {
    config: OutdoorConfig,
    target_name: String,
    /// Where the user stood when the route was requested; start of the
    /// first segment.
    origin: GeoCoordinate,
    route: Vec<Waypoint>,
    index: usize,
    off_route: DwellTimer,
    arrived: bool,
}

impl OutdoorNavigator {
    /// Start following `route` from `origin`.
    ///
    /// An empty route is [`NavError::RouteUnavailable`].
    pub fn start(
        target_name: impl Into<String>,
        origin: GeoCoordinate,
        route: Vec<Waypoint>,
        config: OutdoorConfig,
    ) -> Result<Self, NavError> {
        check_route(&route)?;
        let target_name = target_name.into();
        info!(target = %target_name, waypoints = route.len(), "outdoor navigation started");
        Ok(Self {
            off_route: DwellTimer::new(Duration::from_secs(config.off_route_dwell_secs)),
            config,
            target_name,
            origin,
            route,
            index: 0,
            arrived: false,
        })
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn route(&self) -> &[Waypoint] {
        &self.route
    }

    pub fn waypoint_index(&self) -> usize {
        self.index
    }

    /// Final waypoint of the route.
    pub fn destination(&self) -> &GeoCoordinate {
        // `check_route` guarantees at least one waypoint.
        &self.route[self.route.len() - 1].geo
    }

    /// Replace the route after going off course.
    pub fn reroute(&mut self, origin: GeoCoordinate, route: Vec<Waypoint>) -> Result<(), NavError> {
        check_route(&route)?;
        info!(target = %self.target_name, waypoints = route.len(), "route replaced");
        self.origin = origin;
        self.route = route;
        self.index = 0;
        self.arrived = false;
        self.off_route.reset();
        Ok(())
    }

    pub fn tick(&mut self, position: &GeoCoordinate) -> Result<OutdoorGuidance, NavError> {
        if !position.is_valid() || position.fix_quality == FixQuality::NoFix {
            return Err(NavError::sensor_fault("gps", "no usable fix for outdoor guidance"));
        }

        while !self.arrived {
            let d = geo::haversine_m(position, &self.route[self.index].geo);
            if d > self.config.waypoint_radius_m {
                break;
            }
            if self.index + 1 == self.route.len() {
                info!(target = %self.target_name, "final waypoint reached");
                self.arrived = true;
            } else {
                self.index += 1;
                debug!(index = self.index, "waypoint advanced");
            }
        }

        let waypoint = &self.route[self.index];
        let cross_track_m = self.cross_track_m(position);
        let off_route = if self.arrived {
            self.off_route.reset();
            false
        } else {
            self.off_route
                .update(cross_track_m > self.config.off_route_threshold_m, position.timestamp_ns)
        };
        if off_route {
            warn!(cross_track_m, "off route");
        }

        Ok(OutdoorGuidance {
            distance_to_waypoint_m: geo::haversine_m(position, &waypoint.geo),
            bearing_rad: geo::initial_bearing_rad(position, &waypoint.geo),
            waypoint_index: self.index,
            instruction: waypoint.instruction.clone(),
            cross_track_m,
            off_route,
            arrived: self.arrived,
        })
    }

    /// Distance from `position` to the closest segment still ahead.
    fn cross_track_m(&self, position: &GeoCoordinate) -> f64 {
        let points: Vec<(f64, f64)> = std::iter::once(&self.origin)
            .chain(self.route.iter().map(|w| &w.geo))
            .map(|g| {
                let o = geo::enu_offset(position, g);
                (o.east_m, o.north_m)
            })
            .collect();
        points[self.index..]
            .windows(2)
            .map(|seg| distance_to_segment(seg[0], seg[1]))
            .fold(f64::INFINITY, f64::min)
    }
}

fn check_route(route: &[Waypoint]) -> Result<(), NavError> {
    if route.is_empty() {
        return Err(NavError::RouteUnavailable("route has no waypoints".to_string()));
    }
    if route.iter().any(|w| !w.geo.is_valid()) {
        return Err(NavError::RouteUnavailable("route contains an invalid waypoint".to_string()));
    }
    Ok(())
}

/// Distance from the plane origin to segment `a`–`b`.
fn distance_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 > 0.0 {
        (-(a.0 * dx + a.1 * dy) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (a.0 + t * dx).hypot(a.1 + t * dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const SEC: u64 = 1_000_000_000;

    fn origin() -> GeoCoordinate {
        GeoCoordinate::new(1.3521, 103.8198, 0.0)
    }

    fn at(north_m: f64, east_m: f64, ts: u64) -> GeoCoordinate {
        let north = geo::destination(&origin(), 0.0, north_m);
        let mut p = geo::destination(&north, FRAC_PI_2, east_m);
        p.horizontal_accuracy_m = 4.0;
        p.with_timestamp(ts)
    }

    /// Straight route due north: waypoints every 100 m up to 500 m.
    fn northbound() -> OutdoorNavigator {
        let route = (1..=5)
            .map(|i| Waypoint::new(at(100.0 * i as f64, 0.0, 0), format!("continue {i}")))
            .collect();
        OutdoorNavigator::start("bakery", origin(), route, OutdoorConfig::default()).unwrap()
    }

    #[test]
    fn empty_route_is_unavailable() {
        let err = OutdoorNavigator::start("bakery", origin(), Vec::new(), OutdoorConfig::default()).unwrap_err();
        assert!(matches!(err, NavError::RouteUnavailable(_)));
    }

    #[test]
    fn bearing_and_distance_to_first_waypoint() {
        let mut nav = northbound();
        let g = nav.tick(&at(0.0, 0.0, 0)).unwrap();
        assert_eq!(g.waypoint_index, 0);
        assert!((g.distance_to_waypoint_m - 100.0).abs() < 0.5);
        assert!(g.bearing_rad < 0.01 || g.bearing_rad > std::f64::consts::TAU - 0.01);
        assert_eq!(g.instruction, "continue 1");
    }

    #[test]
    fn waypoint_advances_within_radius() {
        let mut nav = northbound();
        let g = nav.tick(&at(97.0, 0.0, 0)).unwrap();
        assert_eq!(g.waypoint_index, 1);
        assert!((g.distance_to_waypoint_m - 103.0).abs() < 0.5);
    }

    #[test]
    fn track_within_threshold_is_never_off_route() {
        let mut nav = northbound();
        for s in 0..60 {
            let g = nav.tick(&at(s as f64 * 1.5, 18.0, s * SEC)).unwrap();
            assert!(!g.off_route, "off route at {s} s");
        }
    }

    #[test]
    fn sustained_divergence_is_off_route() {
        let mut nav = northbound();
        let mut flagged_at = None;
        for s in 0..15 {
            let g = nav.tick(&at(s as f64, 25.0, s * SEC)).unwrap();
            assert!((g.cross_track_m - 25.0).abs() < 0.5);
            if g.off_route && flagged_at.is_none() {
                flagged_at = Some(s);
            }
        }
        assert_eq!(flagged_at, Some(10));
    }

    #[test]
    fn returning_to_route_clears_the_timer() {
        let mut nav = northbound();
        for s in 0..9 {
            nav.tick(&at(s as f64, 25.0, s * SEC)).unwrap();
        }
        assert!(!nav.tick(&at(9.0, 2.0, 9 * SEC)).unwrap().off_route);
        for s in 10..19 {
            assert!(!nav.tick(&at(s as f64, 25.0, s * SEC)).unwrap().off_route);
        }
    }

    #[test]
    fn arrival_on_final_waypoint() {
        let mut nav = northbound();
        for (i, north) in [100.0, 200.0, 300.0, 400.0].into_iter().enumerate() {
            let g = nav.tick(&at(north, 0.0, i as u64 * SEC)).unwrap();
            assert!(!g.arrived);
        }
        let g = nav.tick(&at(498.0, 1.0, 10 * SEC)).unwrap();
        assert!(g.arrived);
        assert_eq!(g.waypoint_index, 4);
        assert!(!g.off_route);
    }

    #[test]
    fn reroute_restarts_from_new_origin() {
        let mut nav = northbound();
        for s in 0..12 {
            nav.tick(&at(0.0, 30.0, s * SEC)).unwrap();
        }
        let here = at(0.0, 30.0, 12 * SEC);
        let route = vec![Waypoint::new(at(500.0, 0.0, 0), "head north-west")];
        nav.reroute(here, route).unwrap();
        let g = nav.tick(&at(0.0, 30.0, 13 * SEC)).unwrap();
        assert!(!g.off_route);
        assert!(g.cross_track_m < 1.0);
        assert_eq!(nav.route().len(), 1);
        assert!(nav.reroute(here, Vec::new()).is_err());
    }

    #[test]
    fn no_fix_is_rejected() {
        let mut nav = northbound();
        let mut fix = at(0.0, 0.0, 0);
        fix.fix_quality = FixQuality::NoFix;
        assert!(matches!(nav.tick(&fix), Err(NavError::SensorFault { .. })));
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        assert!((distance_to_segment((-1.0, 1.0), (1.0, 1.0)) - 1.0).abs() < 1e-12);
        assert!((distance_to_segment((3.0, 4.0), (6.0, 8.0)) - 5.0).abs() < 1e-12);
        assert!((distance_to_segment((3.0, 4.0), (3.0, 4.0)) - 5.0).abs() < 1e-12);
    }
}
