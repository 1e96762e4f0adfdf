//! Sensor and guidance buses.
//!
//! # Sensor bus
//!
//! Every sensor lane is a capacity-1 [`tokio::sync::watch`] channel: a
//! producer overwrites the previous sample and never blocks, and the single
//! consumer (the fusion worker) always sees the newest one. Skipped IMU
//! samples are harmless because the fusion engine integrates over the real
//! timestamp gap.
//!
//! | Topic | Producer | Typical rate |
//! |---|---|---|
//! | [`SensorTopic::Imu`] | IMU driver | ≤ 100 Hz |
//! | [`SensorTopic::Visual`] | Visual-odometry front-end | 10–30 Hz |
//! | [`SensorTopic::Gps`] | GPS receiver / phone | ≈ 1 Hz |
//! | [`SensorTopic::Map`] | Visual-odometry front-end | on map switch |
//!
//! # Guidance bus
//!
//! Guidance output fans out over a [`tokio::sync::broadcast`] channel so the
//! audio mixer, the speech front-end and the CLI each get every event.
//!
//! # Example
//!
//! ```rust
//! use wayfind_middleware::bus::{SensorBus, SensorReading};
//! use wayfind_types::{ImuSample, Vec3};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = SensorBus::default();
//! let mut sub = bus.subscribe();
//! bus.publish_imu(ImuSample::new(Vec3::zero(), Vec3::new(0.0, 9.8, 0.0), 1));
//! bus.publish_imu(ImuSample::new(Vec3::zero(), Vec3::new(0.0, 9.8, 0.0), 2));
//!
//! // Latest wins: only the second sample is delivered.
//! match sub.recv().await {
//!     Some(SensorReading::Imu(s)) => assert_eq!(s.timestamp_ns, 2),
//!     other => panic!("unexpected {other:?}"),
//! }
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::warn;
use wayfind_types::{GeoCoordinate, GuidanceEvent, ImuSample, MapId, VisualDelta};

/// Default guidance channel capacity (events buffered before slow
/// subscribers start lagging).
const DEFAULT_GUIDANCE_CAPACITY: usize = 256;

/// Name of the map active before the front-end reports one.
pub const DEFAULT_MAP: &str = "default";

// ────────────────────────────────────────────────────────────────────────────
// Sensor bus
// ────────────────────────────────────────────────────────────────────────────

/// Sensor lanes on the [`SensorBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorTopic {
    Imu,
    Visual,
    Gps,
    Map,
}

impl SensorTopic {
    pub const ALL: [SensorTopic; 4] = [SensorTopic::Imu, SensorTopic::Visual, SensorTopic::Gps, SensorTopic::Map];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorTopic::Imu => "imu",
            SensorTopic::Visual => "visual",
            SensorTopic::Gps => "gps",
            SensorTopic::Map => "map",
        }
    }
}

impl fmt::Display for SensorTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item taken off the sensor bus.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Imu(ImuSample),
    Visual(VisualDelta),
    Gps(GeoCoordinate),
    /// The visual front-end switched to another local map.
    MapChanged(MapId),
}

impl SensorReading {
    pub fn topic(&self) -> SensorTopic {
        match self {
            SensorReading::Imu(_) => SensorTopic::Imu,
            SensorReading::Visual(_) => SensorTopic::Visual,
            SensorReading::Gps(_) => SensorTopic::Gps,
            SensorReading::MapChanged(_) => SensorTopic::Map,
        }
    }
}

#[derive(Debug)]
struct SensorLanes {
    imu: watch::Sender<Option<ImuSample>>,
    visual: watch::Sender<Option<VisualDelta>>,
    gps: watch::Sender<Option<GeoCoordinate>>,
    map: watch::Sender<MapId>,
}

/// Shared latest-wins sensor bus. Clone it cheaply – all clones share the
/// same lanes.
#[derive(Debug, Clone)]
pub struct SensorBus {
    lanes: Arc<SensorLanes>,
}

impl Default for SensorBus {
    fn default() -> Self {
        Self::new(MapId::new(DEFAULT_MAP))
    }
}

impl SensorBus {
    pub fn new(initial_map: MapId) -> Self {
        Self {
            lanes: Arc::new(SensorLanes {
                imu: watch::channel(None).0,
                visual: watch::channel(None).0,
                gps: watch::channel(None).0,
                map: watch::channel(initial_map).0,
            }),
        }
    }

    pub fn publish_imu(&self, sample: ImuSample) {
        self.lanes.imu.send_replace(Some(sample));
    }

    pub fn publish_visual(&self, delta: VisualDelta) {
        self.lanes.visual.send_replace(Some(delta));
    }

    pub fn publish_gps(&self, fix: GeoCoordinate) {
        self.lanes.gps.send_replace(Some(fix));
    }

    /// Announce that the visual front-end now tracks against `map`.
    /// Re-announcing the current map is a no-op.
    pub fn set_active_map(&self, map: MapId) {
        self.lanes.map.send_if_modified(|current| {
            if *current == map {
                false
            } else {
                *current = map;
                true
            }
        });
    }

    pub fn active_map(&self) -> MapId {
        self.lanes.map.borrow().clone()
    }

    /// Newest GPS fix published so far, if any.
    pub fn latest_gps(&self) -> Option<GeoCoordinate> {
        *self.lanes.gps.borrow()
    }

    /// A consumer that sees only values published after this call.
    pub fn subscribe(&self) -> SensorSubscriber {
        SensorSubscriber {
            imu: self.lanes.imu.subscribe(),
            visual: self.lanes.visual.subscribe(),
            gps: self.lanes.gps.subscribe(),
            map: self.lanes.map.subscribe(),
        }
    }
}

/// Receiving end of the [`SensorBus`].
#[derive(Debug)]
pub struct SensorSubscriber {
    imu: watch::Receiver<Option<ImuSample>>,
    visual: watch::Receiver<Option<VisualDelta>>,
    gps: watch::Receiver<Option<GeoCoordinate>>,
    map: watch::Receiver<MapId>,
}

impl SensorSubscriber {
    /// Wait for the next fresh value on any lane.
    ///
    /// When several lanes are ready at once they are drained in the order
    /// map, IMU, visual, GPS so that prediction precedes correction.
    /// Returns `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<SensorReading> {
        loop {
            tokio::select! {
                biased;
                changed = self.map.changed() => {
                    changed.ok()?;
                    return Some(SensorReading::MapChanged(self.map.borrow_and_update().clone()));
                }
                changed = self.imu.changed() => {
                    changed.ok()?;
                    if let Some(sample) = *self.imu.borrow_and_update() {
                        return Some(SensorReading::Imu(sample));
                    }
                }
                changed = self.visual.changed() => {
                    changed.ok()?;
                    if let Some(delta) = *self.visual.borrow_and_update() {
                        return Some(SensorReading::Visual(delta));
                    }
                }
                changed = self.gps.changed() => {
                    changed.ok()?;
                    if let Some(fix) = *self.gps.borrow_and_update() {
                        return Some(SensorReading::Gps(fix));
                    }
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Guidance bus
// ────────────────────────────────────────────────────────────────────────────

/// Broadcast bus for [`GuidanceEvent`]s.
#[derive(Debug, Clone)]
pub struct GuidanceBus {
    sender: broadcast::Sender<GuidanceEvent>,
}

impl GuidanceBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of subscribers handed the event; `0` when nobody
    /// is listening, which is a normal condition.
    pub fn publish(&self, event: GuidanceEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> GuidanceReceiver {
        GuidanceReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for GuidanceBus {
    fn default() -> Self {
        Self::new(DEFAULT_GUIDANCE_CAPACITY)
    }
}

/// Subscriber on the [`GuidanceBus`] that skips over lag.
pub struct GuidanceReceiver {
    receiver: broadcast::Receiver<GuidanceEvent>,
}

impl GuidanceReceiver {
    /// Wait for the next event. Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<GuidanceEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "guidance subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<GuidanceEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "guidance subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}
