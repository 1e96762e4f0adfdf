//! Simulated sensor feed.
//!
//! Stands in for the phone's IMU, visual odometry and GPS receiver when no
//! hardware is attached. The simulated user holds the device upright facing
//! north and walks straight ahead at a constant speed (zero by default), so
//! every lane agrees with every other one:
//!
//! - **IMU** – gravity only, plus a magnetometer sample pointing north.
//! - **Visual** – the translation walked since the previous frame.
//! - **GPS** – the true position, offset from the configured origin.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;
use wayfind_middleware::SensorBus;
use wayfind_types::geo::{EnuOffset, FixQuality, from_enu};
use wayfind_types::{GeoCoordinate, ImuSample, NANOS_PER_SEC, Position, Quaternion, STANDARD_GRAVITY, Vec3, VisualDelta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub enabled: bool,
    /// Where the walk starts.
    pub origin_lat_deg: f64,
    pub origin_lon_deg: f64,
    pub gps_accuracy_m: f64,
    pub walk_speed_m_s: f64,
    pub imu_hz: f64,
    pub visual_hz: f64,
    pub gps_hz: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            origin_lat_deg: 1.3521,
            origin_lon_deg: 103.8198,
            gps_accuracy_m: 4.0,
            walk_speed_m_s: 0.0,
            imu_hz: 100.0,
            visual_hz: 10.0,
            gps_hz: 1.0,
        }
    }
}

/// Horizontal magnetic field with a downward dip, in the upright body frame
/// (µT). Points at local `-Z`, i.e. north.
const MAG_FIELD: Vec3 = Vec3::new(0.0, -40.0, -20.0);

pub struct SimulatedFeed {
    config: SimConfig,
    sensors: SensorBus,
    origin: GeoCoordinate,
}

impl SimulatedFeed {
    pub fn new(config: SimConfig, sensors: SensorBus) -> Self {
        let origin = GeoCoordinate::new(config.origin_lat_deg, config.origin_lon_deg, 0.0);
        Self {
            config,
            sensors,
            origin,
        }
    }

    /// True local position `t_ns` into the walk.
    pub fn position_at(&self, t_ns: u64) -> Position {
        let t = t_ns as f64 / NANOS_PER_SEC;
        Position::new(0.0, 0.0, -self.config.walk_speed_m_s * t)
    }

    pub fn imu_sample(&self, t_ns: u64) -> ImuSample {
        ImuSample::new(Vec3::zero(), Vec3::new(0.0, STANDARD_GRAVITY, 0.0), t_ns).with_mag(MAG_FIELD)
    }

    pub fn visual_delta(&self, prev_ns: u64, t_ns: u64) -> VisualDelta {
        let step = self.position_at(prev_ns).offset_to(self.position_at(t_ns));
        VisualDelta::isotropic(step, Quaternion::identity(), 0.02, 0.01, t_ns)
    }

    pub fn gps_fix(&self, t_ns: u64) -> GeoCoordinate {
        let p = self.position_at(t_ns);
        let geo = from_enu(
            &self.origin,
            EnuOffset {
                east_m: p.x,
                north_m: -p.z,
                up_m: p.y,
            },
        );
        GeoCoordinate::fix(
            geo.latitude_deg,
            geo.longitude_deg,
            geo.altitude_m,
            self.config.gps_accuracy_m,
            FixQuality::Fix3d,
            t_ns,
        )
    }

    /// Publish readings at the configured rates until `shutdown` turns
    /// `true`. Timestamps count from the start of the feed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut imu = ticker(self.config.imu_hz);
        let mut visual = ticker(self.config.visual_hz);
        let mut gps = ticker(self.config.gps_hz);
        let start = Instant::now();
        let mut last_visual_ns = 0;
        info!(
            lat = self.origin.latitude_deg,
            lon = self.origin.longitude_deg,
            speed_m_s = self.config.walk_speed_m_s,
            "simulated sensor feed started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = imu.tick() => {
                    self.sensors.publish_imu(self.imu_sample(elapsed_ns(start)));
                }
                _ = visual.tick() => {
                    let now = elapsed_ns(start);
                    self.sensors.publish_visual(self.visual_delta(last_visual_ns, now));
                    last_visual_ns = now;
                }
                _ = gps.tick() => {
                    self.sensors.publish_gps(self.gps_fix(elapsed_ns(start)));
                }
            }
        }
        info!("simulated sensor feed stopped");
    }
}

fn ticker(hz: f64) -> tokio::time::Interval {
    let hz = if hz.is_finite() { hz.clamp(0.1, 1_000.0) } else { 1.0 };
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / hz));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn elapsed_ns(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
