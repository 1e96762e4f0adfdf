//! Fusion worker.
//!
//! The single consumer of the [`SensorBus`][wayfind_middleware::SensorBus]
//! and the only writer of the pose. Each reading taken off the bus is applied
//! to the [`PoseFusionEngine`] in turn, so no two corrections ever run
//! concurrently:
//!
//! 1. **IMU** – strap-down prediction.
//! 2. **Visual delta** – relative correction.
//! 3. **GPS** – absolute correction through the installed frame transform,
//!    then an attempt to pair the fix with the fused pose as a new map
//!    anchor. Accepted anchors are persisted to the [`AnchorLog`] and the
//!    refreshed transform is pushed back into the engine.
//! 4. **Map change** – the visual front-end re-localised in another map: the
//!    engine is reset and that map's anchors are reloaded.
//!
//! Sensor faults are logged and never stop the worker. A
//! [`SensorWatchdog`] reports lanes that fall silent.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use wayfind_memory::AnchorLog;
use wayfind_middleware::{SensorReading, SensorSubscriber};
use wayfind_perception::{GpsOutcome, MapAnchorStore, PoseFusionEngine, PoseHandle};
use wayfind_types::{GeoCoordinate, MapId, Pose3D};

use crate::watchdog::{SensorWatchdog, WatchdogConfig};

pub struct FusionWorker {
    engine: PoseFusionEngine,
    anchors: MapAnchorStore,
    anchor_log: AnchorLog,
    active_map: MapId,
    watchdog: SensorWatchdog,
    check_interval: Duration,
}

impl FusionWorker {
    /// Build a worker for `active_map`, reloading that map's persisted
    /// anchors so the frame transform is available immediately.
    pub fn new(
        engine: PoseFusionEngine,
        anchors: MapAnchorStore,
        anchor_log: AnchorLog,
        active_map: MapId,
        watchdog: &WatchdogConfig,
    ) -> Self {
        let mut worker = Self {
            engine,
            anchors,
            anchor_log,
            active_map,
            watchdog: SensorWatchdog::from_config(watchdog),
            check_interval: Duration::from_millis(watchdog.check_interval_ms.max(1)),
        };
        worker.restore_anchors();
        worker
    }

    pub fn handle(&self) -> PoseHandle {
        self.engine.handle()
    }

    pub fn engine(&self) -> &PoseFusionEngine {
        &self.engine
    }

    pub fn anchors(&self) -> &MapAnchorStore {
        &self.anchors
    }

    pub fn active_map(&self) -> &MapId {
        &self.active_map
    }

    /// Apply one reading. Faults are logged; the engine has already left its
    /// state untouched.
    #[instrument(level = "trace", skip_all, fields(topic = %reading.topic()))]
    pub fn handle_reading(&mut self, reading: SensorReading) {
        self.watchdog.heartbeat(reading.topic());
        match reading {
            SensorReading::Imu(sample) => {
                if let Err(e) = self.engine.ingest_imu(&sample) {
                    debug!(error = %e, "imu sample dropped");
                }
            }
            SensorReading::Visual(delta) => {
                if let Err(e) = self.engine.correct_visual(&delta) {
                    debug!(error = %e, "visual delta dropped");
                }
            }
            SensorReading::Gps(fix) => self.on_gps(&fix),
            SensorReading::MapChanged(map) => self.on_map_changed(map),
        }
    }

    /// Drain the sensor bus until it closes or `shutdown` turns `true`.
    /// Returns the worker so its final state can be inspected.
    pub async fn run(mut self, mut sensors: SensorSubscriber, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut check = tokio::time::interval(self.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(map = %self.active_map, "fusion worker started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                reading = sensors.recv() => match reading {
                    Some(reading) => self.handle_reading(reading),
                    None => {
                        info!("sensor bus closed");
                        break;
                    }
                },
                _ = check.tick() => {
                    for (topic, quiet) in self.watchdog.newly_silent() {
                        warn!(%topic, quiet_ms = quiet.as_millis() as u64, "sensor lane silent");
                    }
                }
            }
        }
        info!("fusion worker stopped");
        self
    }

    fn on_gps(&mut self, fix: &GeoCoordinate) {
        match self.engine.correct_gps(fix, fix.horizontal_accuracy_m) {
            Ok(GpsOutcome::Applied) => {}
            Ok(GpsOutcome::Withheld(reason)) => debug!(?reason, "gps fix withheld"),
            Err(e) => {
                debug!(error = %e, "gps fix dropped");
                return;
            }
        }

        let Ok(pose) = self.engine.check_tracking() else {
            return;
        };
        if !self.anchors.add_anchor_if_eligible(&pose, fix) {
            return;
        }
        if let Some(anchor) = self.anchors.latest()
            && let Err(e) = self.anchor_log.append(&self.active_map, anchor)
        {
            warn!(error = %e, map = %self.active_map, "failed to persist map anchor");
        }
        self.engine.set_frame_transform(self.anchors.transform());
    }

    fn on_map_changed(&mut self, map: MapId) {
        if map == self.active_map {
            return;
        }
        info!(from = %self.active_map, to = %map, "active map changed");
        let clock = self.engine.current_pose().timestamp_ns;
        self.engine.reset(Pose3D {
            timestamp_ns: clock,
            ..Pose3D::identity()
        });
        self.anchors.clear();
        self.active_map = map;
        self.restore_anchors();
    }

    fn restore_anchors(&mut self) {
        let limit = self.anchors.config().max_retained;
        match self.anchor_log.load_latest(&self.active_map, limit) {
            Ok(anchors) if !anchors.is_empty() => {
                info!(map = %self.active_map, count = anchors.len(), "map anchors restored");
                self.anchors.restore(anchors);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, map = %self.active_map, "failed to load map anchors"),
        }
        self.engine.set_frame_transform(self.anchors.transform());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wayfind_memory::{SqliteSink, StorageSink};
    use wayfind_middleware::SensorBus;
    use wayfind_perception::{AnchorConfig, FusionConfig};
    use wayfind_types::frame::UP;
    use wayfind_types::geo::{EnuOffset, FixQuality, from_enu};
    use wayfind_types::{ImuSample, MapAnchor, Position, Quaternion, STANDARD_GRAVITY, Vec3};

    const MS: u64 = 1_000_000;

    fn sink() -> Arc<dyn StorageSink> {
        Arc::new(SqliteSink::open_in_memory().unwrap())
    }

    fn worker(sink: Arc<dyn StorageSink>, map: &str) -> FusionWorker {
        FusionWorker::new(
            PoseFusionEngine::new(FusionConfig::default()),
            MapAnchorStore::new(AnchorConfig::default()),
            AnchorLog::new(sink),
            MapId::new(map),
            &WatchdogConfig::default(),
        )
    }

    fn still(ts: u64) -> SensorReading {
        SensorReading::Imu(ImuSample::new(Vec3::zero(), Vec3::new(0.0, STANDARD_GRAVITY, 0.0), ts))
    }

    fn fix(accuracy_m: f64, ts: u64) -> SensorReading {
        SensorReading::Gps(GeoCoordinate::fix(1.3521, 103.8198, 0.0, accuracy_m, FixQuality::Fix3d, ts))
    }

    #[test]
    fn imu_readings_advance_the_pose() {
        let mut w = worker(sink(), "home");
        let handle = w.handle();
        for i in 0..5 {
            w.handle_reading(still(i * 10 * MS));
        }
        assert_eq!(handle.current_pose().timestamp_ns, 40 * MS);
        assert!(handle.current_pose().position.distance_to(Position::origin()) < 1e-6);
    }

    #[test]
    fn accurate_fix_becomes_a_persisted_anchor() {
        let store = sink();
        let mut w = worker(store.clone(), "home");
        w.handle_reading(still(0));
        w.handle_reading(still(10 * MS));
        w.handle_reading(fix(3.0, 10 * MS));

        assert!(w.anchors().has_transform());
        assert!(w.handle().fused_state().frame_transform.is_some());
        let log = AnchorLog::new(store);
        assert_eq!(log.load_latest(&MapId::new("home"), 10).unwrap().len(), 1);
    }

    #[test]
    fn inaccurate_fix_never_anchors() {
        let mut w = worker(sink(), "home");
        w.handle_reading(still(0));
        w.handle_reading(fix(50.0, 0));
        assert!(!w.anchors().has_transform());
        assert!(w.handle().fused_state().frame_transform.is_none());
    }

    #[test]
    fn anchors_survive_a_restart() {
        let store = sink();
        {
            let mut w = worker(store.clone(), "home");
            w.handle_reading(still(0));
            w.handle_reading(fix(3.0, 0));
        }
        let w = worker(store, "home");
        assert!(w.anchors().has_transform());
        assert!(w.handle().fused_state().frame_transform.is_some());
    }

    #[test]
    fn new_anchors_are_admitted_after_a_restart() {
        let store = sink();
        let late = 3_600_000 * MS;
        {
            let mut w = worker(store.clone(), "home");
            w.handle_reading(still(late));
            w.handle_reading(fix(3.0, late));
            assert_eq!(w.anchors().anchors().len(), 1);
        }

        // The new session's sensor clock starts at zero again.
        let mut w = worker(store.clone(), "home");
        for step in 0..=20 {
            let ts = step * 50 * MS;
            w.handle_reading(still(ts));
            if ts % (1_000 * MS) == 0 {
                w.handle_reading(fix(3.0, ts));
            }
        }
        assert_eq!(w.anchors().anchors().len(), 3);
        assert_eq!(w.anchors().latest().unwrap().timestamp_ns, 1_000 * MS);

        let log = AnchorLog::new(store);
        let stamps: Vec<u64> = log
            .load_latest(&MapId::new("home"), 10)
            .unwrap()
            .iter()
            .map(|a| a.timestamp_ns)
            .collect();
        assert_eq!(stamps, vec![late, 0, 1_000 * MS]);
    }

    /// Anchor for local point `l` on a map turned by `yaw` against north.
    fn rotated_anchor(yaw: f64, l: Position, ts: u64) -> MapAnchor {
        let base = GeoCoordinate::new(1.3521, 103.8198, 0.0);
        let m = Quaternion::from_axis_angle(UP, yaw).inverse_rotate(l.as_vec3());
        let geo = from_enu(
            &base,
            EnuOffset {
                east_m: m.x,
                north_m: -m.z,
                up_m: m.y,
            },
        );
        MapAnchor {
            local: Pose3D::at(l, ts),
            geo: GeoCoordinate::fix(geo.latitude_deg, geo.longitude_deg, geo.altitude_m, 2.0, FixQuality::Fix3d, ts),
            timestamp_ns: ts,
            gps_accuracy_m: 2.0,
            vio_confidence: 1.0,
        }
    }

    #[test]
    fn yaw_fit_spans_sessions_in_recorded_order() {
        let store = sink();
        let log = AnchorLog::new(store.clone());
        let home = MapId::new("home");
        let square = [
            Position::new(0.0, 0.0, 0.0),
            Position::new(10.0, 0.0, 0.0),
            Position::new(10.0, 0.0, -10.0),
            Position::new(0.0, 0.0, -10.0),
            Position::new(5.0, 0.0, -5.0),
        ];

        // An old session with a bad heading, late on its own clock.
        for (i, l) in square.iter().take(2).enumerate() {
            log.append(&home, &rotated_anchor(-1.0, *l, 5_000_000 * MS + i as u64)).unwrap();
        }
        // Two later sessions, each restarting the clock.
        for (i, l) in square.iter().enumerate() {
            let ts = (i as u64 % 3) * 2_000 * MS;
            log.append(&home, &rotated_anchor(0.3, *l, ts)).unwrap();
        }

        let w = worker(store, "home");
        let transform = w.anchors().transform().unwrap();
        assert_eq!(transform.anchor_count, 7);
        assert!((transform.yaw_rad - 0.3).abs() < 1e-4, "yaw = {}", transform.yaw_rad);
        assert!(transform.residual_m < 0.01);
        assert_eq!(transform.reference, w.anchors().latest().unwrap().geo);
        assert_eq!(w.handle().fused_state().frame_transform, Some(transform));
    }

    #[test]
    fn map_change_swaps_anchor_sets() {
        let store = sink();
        let mut w = worker(store, "home");
        w.handle_reading(still(0));
        w.handle_reading(fix(3.0, 0));
        assert!(w.anchors().has_transform());

        w.handle_reading(SensorReading::MapChanged(MapId::new("office")));
        assert_eq!(w.active_map(), &MapId::new("office"));
        assert!(!w.anchors().has_transform());
        assert!(w.handle().fused_state().frame_transform.is_none());

        w.handle_reading(SensorReading::MapChanged(MapId::new("home")));
        assert!(w.anchors().has_transform());
    }

    #[test]
    fn faulty_readings_are_absorbed() {
        let mut w = worker(sink(), "home");
        w.handle_reading(still(0));
        let before = w.engine().current_pose();
        w.handle_reading(SensorReading::Imu(ImuSample::new(
            Vec3::new(f64::NAN, 0.0, 0.0),
            Vec3::zero(),
            10 * MS,
        )));
        assert_eq!(w.engine().current_pose(), before);
    }

    #[tokio::test]
    async fn run_drains_bus_until_shutdown() {
        let bus = SensorBus::new(MapId::new("home"));
        let (stop_tx, stop_rx) = watch::channel(false);
        let w = worker(sink(), "home");
        let handle = w.handle();
        let task = tokio::spawn(w.run(bus.subscribe(), stop_rx));

        bus.publish_imu(ImuSample::new(Vec3::zero(), Vec3::new(0.0, STANDARD_GRAVITY, 0.0), 0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish_imu(ImuSample::new(Vec3::zero(), Vec3::new(0.0, STANDARD_GRAVITY, 0.0), 10 * MS));
        tokio::time::sleep(Duration::from_millis(20)).await;

        stop_tx.send(true).unwrap();
        let w = task.await.unwrap();
        assert_eq!(handle.current_pose().timestamp_ns, 10 * MS);
        assert_eq!(w.active_map(), &MapId::new("home"));
    }

    #[test]
    fn each_reading_is_traced() {
        let (spans, _guard) = crate::telemetry::capture::capture_spans();
        let mut w = worker(sink(), "home");
        w.handle_reading(still(0));
        assert!(spans.contains("handle_reading"));
    }
}
