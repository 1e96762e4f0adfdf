//! External collaborators consumed by the command surface.

use async_trait::async_trait;
use wayfind_types::{GeoCoordinate, NavError, Waypoint};

/// Client of a mapping / routing service.
///
/// Only the command surface awaits these calls; the fusion worker and the
/// guidance loop never block on them.
#[async_trait]
pub trait MappingService: Send + Sync {
    /// Walking route from `origin` to `destination`. The last waypoint is the
    /// destination itself.
    ///
    /// Failures should be reported as [`NavError::RouteUnavailable`].
    async fn get_route(&self, origin: &GeoCoordinate, destination: &GeoCoordinate) -> Result<Vec<Waypoint>, NavError>;

    /// Human-readable address of `geo`.
    async fn reverse_geocode(&self, geo: &GeoCoordinate) -> Result<String, NavError>;
}
