//! Offline mapping service.
//!
//! [`DirectRouteService`] needs no network: routes are the great-circle line
//! to the destination cut into legs, and "addresses" are the coordinates
//! themselves. Good enough for open ground and for exercising the outdoor
//! navigator without a routing backend.

use async_trait::async_trait;
use tracing::debug;
use wayfind_runtime::MappingService;
use wayfind_types::geo::{destination, haversine_m, initial_bearing_rad};
use wayfind_types::{GeoCoordinate, NavError, Waypoint};

/// Straight-line routing with coordinate-formatted addresses.
#[derive(Debug, Clone)]
pub struct DirectRouteService {
    /// Longest leg between two waypoints (m).
    pub max_leg_m: f64,
}

impl Default for DirectRouteService {
    fn default() -> Self {
        Self { max_leg_m: 50.0 }
    }
}

#[async_trait]
impl MappingService for DirectRouteService {
    async fn get_route(&self, origin: &GeoCoordinate, to: &GeoCoordinate) -> Result<Vec<Waypoint>, NavError> {
        if !origin.is_valid() || !to.is_valid() {
            return Err(NavError::RouteUnavailable("invalid coordinates".to_string()));
        }
        let total_m = haversine_m(origin, to);
        let bearing = initial_bearing_rad(origin, to);
        let leg_m = self.max_leg_m.max(1.0);
        let legs = (total_m / leg_m).ceil().max(1.0) as usize;

        let mut route = Vec::with_capacity(legs);
        for i in 1..legs {
            let point = destination(origin, bearing, total_m * i as f64 / legs as f64);
            route.push(Waypoint::new(
                point,
                format!("Continue {} for {:.0} metres", compass_point(bearing), total_m / legs as f64),
            ));
        }
        let last = if legs == 1 {
            format!("Head {} for {:.0} metres", compass_point(bearing), total_m)
        } else {
            "Your destination is ahead".to_string()
        };
        route.push(Waypoint::new(*to, last));
        debug!(legs, distance_m = total_m, "direct route built");
        Ok(route)
    }

    async fn reverse_geocode(&self, geo: &GeoCoordinate) -> Result<String, NavError> {
        if !geo.is_valid() {
            return Err(NavError::RouteUnavailable("invalid coordinates".to_string()));
        }
        Ok(format!("{:.5}, {:.5}", geo.latitude_deg, geo.longitude_deg))
    }
}

/// Eight-point compass name of a bearing measured clockwise from north.
pub fn compass_point(bearing_rad: f64) -> &'static str {
    const POINTS: [&str; 8] = [
        "north",
        "north-east",
        "east",
        "south-east",
        "south",
        "south-west",
        "west",
        "north-west",
    ];
    let deg = bearing_rad.to_degrees().rem_euclid(360.0);
    POINTS[((deg + 22.5) / 45.0) as usize % 8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn origin() -> GeoCoordinate {
        GeoCoordinate::new(1.3521, 103.8198, 0.0)
    }

    #[tokio::test]
    async fn short_route_is_one_leg() {
        let svc = DirectRouteService::default();
        let to = destination(&origin(), 0.0, 30.0);
        let route = svc.get_route(&origin(), &to).await.unwrap();
        assert_eq!(route.len(), 1);
        assert_eq!(route[0].geo, to);
        assert!(route[0].instruction.contains("north"));
    }

    #[tokio::test]
    async fn long_route_is_split_into_legs() {
        let svc = DirectRouteService::default();
        let to = destination(&origin(), FRAC_PI_2, 120.0);
        let route = svc.get_route(&origin(), &to).await.unwrap();
        assert_eq!(route.len(), 3);
        for pair in route.windows(2) {
            let leg = haversine_m(&pair[0].geo, &pair[1].geo);
            assert!((leg - 40.0).abs() < 0.5, "leg {leg}");
        }
        assert_eq!(route.last().unwrap().geo, to);
        assert!(route[0].instruction.contains("east"));
    }

    #[tokio::test]
    async fn invalid_endpoint_has_no_route() {
        let svc = DirectRouteService::default();
        let bad = GeoCoordinate::new(f64::NAN, 0.0, 0.0);
        assert!(matches!(
            svc.get_route(&origin(), &bad).await,
            Err(NavError::RouteUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn address_is_formatted_coordinates() {
        let svc = DirectRouteService::default();
        assert_eq!(svc.reverse_geocode(&origin()).await.unwrap(), "1.35210, 103.81980");
    }

    #[test]
    fn compass_points_wrap() {
        assert_eq!(compass_point(0.0), "north");
        assert_eq!(compass_point(PI), "south");
        assert_eq!(compass_point(-FRAC_PI_2), "west");
        assert_eq!(compass_point(2.0 * PI - 0.1), "north");
    }
}
