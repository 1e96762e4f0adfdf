//! Command surface.
//!
//! What the voice front-end calls into: "remember this", "where is X",
//! "stop". Every call reads the fused state at command time and returns an
//! explicit [`NavError`] the caller turns into a spoken message.
//!
//! Navigator selection for `navigate_to`:
//!
//! | target | tracking | chosen |
//! |---|---|---|
//! | in the active map | good | indoor |
//! | in the active map | lost | outdoor if a route can be had, else indoor (paused until tracking returns) |
//! | other map / global only | – | outdoor; a failed route surfaces as the error |
//!
//! Only this module awaits the [`MappingService`]; the fusion worker and the
//! guidance loop never block on it.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use wayfind_memory::{RememberRequest, SpatialMemory};
use wayfind_middleware::{GuidanceBus, SensorBus};
use wayfind_perception::{FusedState, PoseHandle};
use wayfind_types::geo::FixQuality;
use wayfind_types::{
    GeoCoordinate, GuidanceEvent, MapId, NavError, NavMode, ObjectId, SpatialObject, elapsed_secs,
};

use crate::indoor::{IndoorConfig, IndoorNavigator};
use crate::outdoor::{OutdoorConfig, OutdoorNavigator};
use crate::services::MappingService;
use crate::session::{NavigationSession, SessionSlot, SessionSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub indoor: IndoorConfig,
    pub outdoor: OutdoorConfig,
    /// A GPS fix older than this (relative to the pose clock) does not
    /// describe where the user is now.
    pub max_fix_age_secs: f64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            indoor: IndoorConfig::default(),
            outdoor: OutdoorConfig::default(),
            max_fix_age_secs: 3.0,
        }
    }
}

/// Snapshot for status displays.
#[derive(Debug, Clone)]
pub struct AssistantStatus {
    pub fused: FusedState,
    pub active_map: MapId,
    pub latest_fix: Option<GeoCoordinate>,
    pub session: Option<SessionSummary>,
}

pub struct Assistant {
    config: AssistantConfig,
    memory: Arc<SpatialMemory>,
    pose: PoseHandle,
    sensors: SensorBus,
    mapping: Arc<dyn MappingService>,
    session: SessionSlot,
    guidance: GuidanceBus,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        memory: Arc<SpatialMemory>,
        pose: PoseHandle,
        sensors: SensorBus,
        mapping: Arc<dyn MappingService>,
        session: SessionSlot,
        guidance: GuidanceBus,
    ) -> Self {
        Self {
            config,
            memory,
            pose,
            sensors,
            mapping,
            session,
            guidance,
        }
    }

    pub fn memory(&self) -> &SpatialMemory {
        &self.memory
    }

    /// Remember the current place as `name`.
    ///
    /// Uses the fused pose (when tracking is good), the freshest GPS fix or,
    /// failing that, the pose carried through the map anchors, and a
    /// reverse-geocoded address when the mapping service can provide one.
    #[instrument(skip(self))]
    pub async fn remember(&self, name: &str, class: &str) -> Result<ObjectId, NavError> {
        let state = self.pose.fused_state();
        let mut request = RememberRequest::new(name, class);
        if !state.tracking_lost {
            request = request.with_pose(state.pose, self.sensors.active_map());
        }
        if let Some(geo) = self.current_position(&state) {
            let address = match self.mapping.reverse_geocode(&geo).await {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!(error = %e, "reverse geocoding failed; remembering without address");
                    None
                }
            };
            request = request.with_geo(geo, address);
        }
        self.memory.remember(request)
    }

    /// Start guiding to the newest object remembered as `name`. Returns the
    /// mode the session starts in.
    #[instrument(skip(self))]
    pub async fn navigate_to(&self, name: &str) -> Result<NavMode, NavError> {
        let target = self.memory.find_latest(name)?;
        let state = self.pose.fused_state();
        let active_map = self.sensors.active_map();
        let now = Instant::now();

        let indoor = IndoorNavigator::start(&target, &active_map, self.config.indoor.clone());
        let session = match indoor {
            Ok(nav) if !state.tracking_lost => NavigationSession::indoor(target.clone(), nav, now),
            indoor => match self.start_outdoor(&target, &state, &active_map).await {
                Ok(outdoor) => {
                    let session = NavigationSession::outdoor(target.clone(), outdoor, now);
                    match indoor {
                        Ok(nav) => session.with_indoor_fallback(nav),
                        Err(_) => session,
                    }
                }
                Err(outdoor_err) => match indoor {
                    Ok(nav) => {
                        warn!(error = %outdoor_err, "outdoor route unavailable; falling back to indoor");
                        NavigationSession::indoor(target.clone(), nav, now)
                    }
                    Err(indoor_err) => {
                        warn!(target = %target.name, error = %outdoor_err, "no navigator available");
                        return Err(if target.has_global() { outdoor_err } else { indoor_err });
                    }
                },
            },
        };

        let mode = session.mode;
        info!(target = %target.name, ?mode, "navigation requested");
        self.session.install(session);
        self.guidance.publish(GuidanceEvent::SessionStarted {
            target: target.name,
            mode,
        });
        Ok(mode)
    }

    /// Stop the active session at the next guidance tick.
    #[instrument(skip(self))]
    pub fn cancel(&self) -> Result<(), NavError> {
        self.session.request_cancel()
    }

    /// Request a fresh route for the active outdoor session. Returns the
    /// number of waypoints in the new route.
    #[instrument(skip(self))]
    pub async fn handle_off_route(&self) -> Result<usize, NavError> {
        let (session_id, destination) = {
            let slot = self.session.lock();
            let session = slot.session.as_ref().ok_or(NavError::NoActiveSession)?;
            let nav = session
                .outdoor
                .as_ref()
                .ok_or_else(|| NavError::RouteUnavailable("session is not following a route".to_string()))?;
            (session.id, *nav.destination())
        };

        let state = self.pose.fused_state();
        let origin = self
            .current_position(&state)
            .ok_or(NavError::InsufficientLocalization)?;
        let route = self.mapping.get_route(&origin, &destination).await?;
        let waypoints = route.len();

        {
            let mut slot = self.session.lock();
            match slot.session.as_mut() {
                Some(session) if session.id == session_id => {
                    if let Some(nav) = session.outdoor.as_mut() {
                        nav.reroute(origin, route)?;
                    }
                }
                // Ended or replaced while the route was being fetched.
                _ => return Err(NavError::NoActiveSession),
            }
        }

        self.guidance.publish(GuidanceEvent::Rerouted { waypoints });
        Ok(waypoints)
    }

    /// Every remembered object, newest first.
    pub fn list(&self) -> Arc<Vec<SpatialObject>> {
        self.memory.list_all()
    }

    /// Forget the newest object remembered as `name`.
    #[instrument(skip(self))]
    pub fn forget(&self, name: &str) -> Result<SpatialObject, NavError> {
        let object = self.memory.find_latest(name)?;
        self.memory.forget(object.id)
    }

    pub fn status(&self) -> AssistantStatus {
        AssistantStatus {
            fused: self.pose.fused_state(),
            active_map: self.sensors.active_map(),
            latest_fix: self.sensors.latest_gps(),
            session: self.session.summary(),
        }
    }

    async fn start_outdoor(
        &self,
        target: &SpatialObject,
        state: &FusedState,
        active_map: &MapId,
    ) -> Result<OutdoorNavigator, NavError> {
        let destination = match (target.geo_position, target.local_position, state.frame_transform) {
            (Some(geo), _, _) => geo,
            (None, Some(local), Some(transform)) if target.is_in_map(active_map) => transform.local_to_global(local),
            _ => return Err(NavError::NoTransformAvailable),
        };
        let origin = self
            .current_position(state)
            .ok_or(NavError::InsufficientLocalization)?;
        let route = self.mapping.get_route(&origin, &destination).await?;
        OutdoorNavigator::start(&target.name, origin, route, self.config.outdoor.clone())
    }

    /// Where the user is on the globe: a fresh fix, else the fused pose
    /// carried through the map anchors.
    fn current_position(&self, state: &FusedState) -> Option<GeoCoordinate> {
        if let Some(fix) = self.sensors.latest_gps()
            && fix.fix_quality != FixQuality::NoFix
            && fix.is_valid()
            && elapsed_secs(fix.timestamp_ns, state.pose.timestamp_ns) <= self.config.max_fix_age_secs
        {
            return Some(fix);
        }
        if state.tracking_lost {
            return None;
        }
        let transform = state.frame_transform?;
        Some(transform.local_to_global(state.pose.position).with_timestamp(state.pose.timestamp_ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wayfind_memory::{MemoryConfig, SqliteSink};
    use wayfind_perception::{FusionConfig, PoseFusionEngine};
    use wayfind_types::{ImuSample, QualityFlags, STANDARD_GRAVITY, Vec3, Waypoint};

    struct FakeMapping {
        fail_routes: bool,
        routes: AtomicUsize,
    }

    impl FakeMapping {
        fn new(fail_routes: bool) -> Arc<Self> {
            Arc::new(Self {
                fail_routes,
                routes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MappingService for FakeMapping {
        async fn get_route(&self, _origin: &GeoCoordinate, destination: &GeoCoordinate) -> Result<Vec<Waypoint>, NavError> {
            self.routes.fetch_add(1, Ordering::SeqCst);
            if self.fail_routes {
                return Err(NavError::RouteUnavailable("offline".to_string()));
            }
            Ok(vec![Waypoint::new(*destination, "walk to the destination")])
        }

        async fn reverse_geocode(&self, _geo: &GeoCoordinate) -> Result<String, NavError> {
            Ok("1 Orchard Road".to_string())
        }
    }

    struct Rig {
        engine: PoseFusionEngine,
        sensors: SensorBus,
        slot: SessionSlot,
        mapping: Arc<FakeMapping>,
        assistant: Assistant,
        guidance: GuidanceBus,
    }

    fn rig(fail_routes: bool) -> Rig {
        let mut engine = PoseFusionEngine::new(FusionConfig::default());
        engine
            .ingest_imu(&ImuSample::new(Vec3::zero(), Vec3::new(0.0, STANDARD_GRAVITY, 0.0), 0))
            .unwrap();
        let sensors = SensorBus::new(MapId::new("home"));
        let slot = SessionSlot::new();
        let guidance = GuidanceBus::default();
        let mapping = FakeMapping::new(fail_routes);
        let memory = SpatialMemory::open(Arc::new(SqliteSink::open_in_memory().unwrap()), MemoryConfig::default())
            .unwrap();
        let assistant = Assistant::new(
            AssistantConfig::default(),
            Arc::new(memory),
            engine.handle(),
            sensors.clone(),
            mapping.clone(),
            slot.clone(),
            guidance.clone(),
        );
        Rig {
            engine,
            sensors,
            slot,
            mapping,
            assistant,
            guidance,
        }
    }

    fn good_fix() -> GeoCoordinate {
        GeoCoordinate::fix(1.3521, 103.8198, 0.0, 4.0, FixQuality::Fix3d, 0)
    }

    fn lose_tracking(rig: &mut Rig) {
        for _ in 0..3 {
            let bad = ImuSample::new(Vec3::new(f64::NAN, 0.0, 0.0), Vec3::zero(), 10_000_000);
            assert!(rig.engine.ingest_imu(&bad).is_err());
        }
    }

    #[tokio::test]
    async fn remember_uses_pose_fix_and_address() {
        let r = rig(false);
        r.sensors.publish_gps(good_fix());
        let id = r.assistant.remember("Wallet", "wallet").await.unwrap();
        let stored = r.assistant.memory().get(id).unwrap();
        assert!(stored.has_local());
        assert!(stored.has_global());
        assert_eq!(stored.address.as_deref(), Some("1 Orchard Road"));
        assert!(stored.quality_flags.contains(QualityFlags::HAS_LOCAL | QualityFlags::HAS_GLOBAL));
    }

    #[tokio::test]
    async fn remember_without_any_localisation_fails() {
        let mut r = rig(false);
        lose_tracking(&mut r);
        let err = r.assistant.remember("wallet", "wallet").await.unwrap_err();
        assert_eq!(err, NavError::InsufficientLocalization);
        assert!(r.assistant.list().is_empty());
    }

    #[tokio::test]
    async fn repeated_remember_keeps_history() {
        let r = rig(false);
        let first = r.assistant.remember("wallet", "wallet").await.unwrap();
        let second = r.assistant.remember("wallet", "wallet").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(r.assistant.memory().find_latest("WALLET").unwrap().id, second);
        assert_eq!(r.assistant.memory().history("wallet").len(), 2);
    }

    #[tokio::test]
    async fn navigate_indoor_when_target_in_active_map() {
        let r = rig(false);
        let mut events = r.guidance.subscribe();
        r.assistant.remember("keys", "keys").await.unwrap();

        assert_eq!(r.assistant.navigate_to("keys").await.unwrap(), NavMode::Indoor);
        assert_eq!(r.mapping.routes.load(Ordering::SeqCst), 0);
        assert!(r.slot.is_active());
        assert_eq!(
            events.try_recv(),
            Some(GuidanceEvent::SessionStarted {
                target: "keys".to_string(),
                mode: NavMode::Indoor
            })
        );
    }

    #[tokio::test]
    async fn unknown_target_is_not_found() {
        let r = rig(false);
        let err = r.assistant.navigate_to("umbrella").await.unwrap_err();
        assert_eq!(err, NavError::ObjectNotFound("umbrella".to_string()));
    }

    #[tokio::test]
    async fn other_map_falls_back_to_outdoor() {
        let r = rig(false);
        r.sensors.publish_gps(good_fix());
        r.assistant.remember("bike", "bicycle").await.unwrap();
        r.sensors.set_active_map(MapId::new("office"));

        assert_eq!(r.assistant.navigate_to("bike").await.unwrap(), NavMode::Outdoor);
        assert_eq!(r.mapping.routes.load(Ordering::SeqCst), 1);
        assert_eq!(r.slot.summary().unwrap().waypoints, 1);
    }

    #[tokio::test]
    async fn other_map_without_geo_is_a_mismatch() {
        let r = rig(false);
        r.assistant.remember("mug", "cup").await.unwrap();
        r.sensors.set_active_map(MapId::new("office"));
        let err = r.assistant.navigate_to("mug").await.unwrap_err();
        assert!(matches!(err, NavError::MapMismatch { .. }));
        assert!(!r.slot.is_active());
    }

    #[tokio::test]
    async fn route_failure_surfaces_when_no_indoor_fallback() {
        let r = rig(true);
        r.sensors.publish_gps(good_fix());
        r.assistant.remember("bike", "bicycle").await.unwrap();
        r.sensors.set_active_map(MapId::new("office"));
        let err = r.assistant.navigate_to("bike").await.unwrap_err();
        assert!(matches!(err, NavError::RouteUnavailable(_)));
    }

    #[tokio::test]
    async fn route_failure_with_lost_tracking_falls_back_to_indoor() {
        let mut r = rig(true);
        r.sensors.publish_gps(good_fix());
        r.assistant.remember("keys", "keys").await.unwrap();
        lose_tracking(&mut r);

        assert_eq!(r.assistant.navigate_to("keys").await.unwrap(), NavMode::Indoor);
        assert_eq!(r.mapping.routes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_requires_a_session() {
        let r = rig(false);
        assert_eq!(r.assistant.cancel(), Err(NavError::NoActiveSession));
        r.assistant.remember("keys", "keys").await.unwrap();
        r.assistant.navigate_to("keys").await.unwrap();
        assert!(r.assistant.cancel().is_ok());
    }

    #[tokio::test]
    async fn off_route_fetches_a_new_route() {
        let r = rig(false);
        let mut events = r.guidance.subscribe();
        r.sensors.publish_gps(good_fix());
        r.assistant.remember("bike", "bicycle").await.unwrap();
        r.sensors.set_active_map(MapId::new("office"));
        r.assistant.navigate_to("bike").await.unwrap();

        assert_eq!(r.assistant.handle_off_route().await.unwrap(), 1);
        assert_eq!(r.mapping.routes.load(Ordering::SeqCst), 2);
        assert!(matches!(events.try_recv(), Some(GuidanceEvent::SessionStarted { .. })));
        assert_eq!(events.try_recv(), Some(GuidanceEvent::Rerouted { waypoints: 1 }));
    }

    #[tokio::test]
    async fn off_route_needs_an_outdoor_session() {
        let r = rig(false);
        assert_eq!(r.assistant.handle_off_route().await, Err(NavError::NoActiveSession));
        r.assistant.remember("keys", "keys").await.unwrap();
        r.assistant.navigate_to("keys").await.unwrap();
        assert!(matches!(
            r.assistant.handle_off_route().await,
            Err(NavError::RouteUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn forget_removes_newest_row() {
        let r = rig(false);
        r.assistant.remember("keys", "keys").await.unwrap();
        let forgotten = r.assistant.forget(" Keys ").unwrap();
        assert_eq!(forgotten.name, "keys");
        assert!(matches!(r.assistant.forget("keys"), Err(NavError::ObjectNotFound(_))));
        assert!(r.assistant.status().session.is_none());
    }

    #[tokio::test]
    async fn commands_are_traced() {
        let (spans, _guard) = crate::telemetry::capture::capture_spans();
        let r = rig(false);
        r.assistant.remember("keys", "keys").await.unwrap();
        r.assistant.navigate_to("keys").await.unwrap();
        r.assistant.cancel().unwrap();
        for name in ["remember", "navigate_to", "cancel"] {
            assert!(spans.contains(name), "{name}");
        }
    }
}
