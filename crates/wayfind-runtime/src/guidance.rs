//! Guidance loop.
//!
//! A fixed-rate tick (15 Hz by default) that reads only fused state and never
//! waits on sensor I/O. Each tick:
//!
//! 1. **Mode** – feeds the newest GPS fix to the [`ModeSelector`] and
//!    reports completed mode switches.
//! 2. **Tracking** – reports tracking loss and recovery. While tracking is
//!    lost guidance is paused and an alert cue is placed instead of a
//!    possibly wrong bearing.
//! 3. **Session** – honours a pending cancel, drives the navigator selected
//!    by the mode, renders the navigation cue, announces meaningful distance
//!    changes and ends the session on arrival or after the target-lost
//!    timeout.
//!
//! Everything produced is published on the [`GuidanceBus`] and also
//! returned from [`GuidanceLoop::step`].

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use wayfind_middleware::{GuidanceBus, SensorBus};
use wayfind_perception::{FusedState, PoseHandle};
use wayfind_types::geo::{self, FixQuality};
use wayfind_types::{
    AudioPlacement, AudioRole, GeoCoordinate, GuidanceEvent, NavMode, Position, SessionEndReason, Vec3,
    elapsed_secs, wrap_angle,
};

use crate::audio::{AudioConfig, SpatialAudioRenderer};
use crate::mode::{ModeConfig, ModeSelector};
use crate::session::NavigationSession;
use crate::session::SessionSlot;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    pub tick_hz: f64,
    /// Announce when the distance changed by at least this much…
    pub announce_min_change_m: f64,
    /// …or by at least this fraction of the last announced distance.
    pub announce_min_change_ratio: f64,
    /// End the session after this long without valid guidance.
    pub target_lost_timeout_secs: u64,
    /// Fixes older than this (relative to the pose clock) are not used for
    /// outdoor guidance; the position is derived from the map anchors.
    pub gps_max_age_secs: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            tick_hz: 15.0,
            announce_min_change_m: 1.0,
            announce_min_change_ratio: 0.2,
            target_lost_timeout_secs: 30,
            gps_max_age_secs: 3.0,
        }
    }
}

impl GuidanceConfig {
    /// Tick period, with the rate held to 1–100 Hz. A non-finite rate falls
    /// back to the default.
    pub fn tick_period(&self) -> Duration {
        let hz = if self.tick_hz.is_finite() {
            self.tick_hz.clamp(1.0, 100.0)
        } else {
            Self::default().tick_hz
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

/// One tick's worth of valid guidance.
struct Cue {
    distance_m: f64,
    bearing_rad: f64,
    placement: AudioPlacement,
    arrived: bool,
    /// Set when the outdoor navigator moved on to a new waypoint.
    new_instruction: Option<String>,
    /// Cross-track distance when the outdoor navigator reports off route.
    off_route_m: Option<f64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// GuidanceLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct GuidanceLoop {
    config: GuidanceConfig,
    pose: PoseHandle,
    sensors: SensorBus,
    session: SessionSlot,
    bus: GuidanceBus,
    mode: ModeSelector,
    renderer: SpatialAudioRenderer,
    last_fix_ns: Option<u64>,
    tracking_lost: bool,
    off_route_reported: bool,
}

impl GuidanceLoop {
    pub fn new(
        config: GuidanceConfig,
        mode: ModeConfig,
        audio: AudioConfig,
        pose: PoseHandle,
        sensors: SensorBus,
        session: SessionSlot,
        bus: GuidanceBus,
    ) -> Self {
        Self {
            config,
            pose,
            sensors,
            session,
            bus,
            mode: ModeSelector::new(mode),
            renderer: SpatialAudioRenderer::new(audio),
            last_fix_ns: None,
            tracking_lost: false,
            off_route_reported: false,
        }
    }

    pub fn mode(&self) -> &ModeSelector {
        &self.mode
    }

    /// Run one tick at wall-clock `now`.
    #[instrument(level = "debug", skip_all)]
    pub fn step(&mut self, now: Instant) -> Vec<GuidanceEvent> {
        let mut events = Vec::new();
        let state = self.pose.fused_state();

        let latest_fix = self.sensors.latest_gps();
        if let Some(fix) = latest_fix
            && self.last_fix_ns != Some(fix.timestamp_ns)
        {
            self.last_fix_ns = Some(fix.timestamp_ns);
            self.mode.observe_fix(&fix);
        }
        let mode_clock = state.pose.timestamp_ns.max(self.last_fix_ns.unwrap_or(0));
        if let Some(change) = self.mode.tick(mode_clock) {
            events.push(GuidanceEvent::ModeChanged {
                from: change.from,
                to: change.to,
            });
        }

        if state.tracking_lost != self.tracking_lost {
            self.tracking_lost = state.tracking_lost;
            if state.tracking_lost {
                warn!(quality = state.tracking_quality, "tracking lost; guidance paused");
                events.push(GuidanceEvent::TrackingLost);
            } else {
                info!(quality = state.tracking_quality, "tracking regained");
                events.push(GuidanceEvent::TrackingRegained);
            }
        }

        self.drive_session(now, &state, latest_fix, &mut events);

        for event in &events {
            self.bus.publish(event.clone());
        }
        events
    }

    /// Tick at the configured rate until `shutdown` turns `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_hz = self.config.tick_hz, "guidance loop started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.step(Instant::now());
                }
            }
        }
        info!("guidance loop stopped");
    }

    fn drive_session(
        &mut self,
        now: Instant,
        state: &FusedState,
        latest_fix: Option<GeoCoordinate>,
        events: &mut Vec<GuidanceEvent>,
    ) {
        let mut slot = self.session.lock();
        let end = {
            let cancel_requested = slot.cancel_requested;
            let Some(session) = slot.session.as_mut() else {
                self.off_route_reported = false;
                return;
            };

            if cancel_requested {
                Some(SessionEndReason::Cancelled)
            } else {
                let mode = session.resolve_mode(self.mode.active_mode());
                if mode != session.mode {
                    info!(from = ?session.mode, to = ?mode, "session navigator switched");
                    session.mode = mode;
                    session.last_announced_distance_m = None;
                }

                let cue = if state.tracking_lost {
                    events.push(GuidanceEvent::Placement {
                        placement: self.renderer.alert(),
                    });
                    None
                } else {
                    match mode {
                        NavMode::Indoor => indoor_cue(session, state, &self.renderer),
                        NavMode::Outdoor => outdoor_cue(session, state, latest_fix, &self.renderer, &self.config),
                    }
                };

                match cue {
                    Some(cue) => {
                        session.last_guidance_at = now;
                        match cue.off_route_m {
                            Some(cross_track_m) if !self.off_route_reported => {
                                self.off_route_reported = true;
                                events.push(GuidanceEvent::OffRoute { cross_track_m });
                            }
                            Some(_) => {}
                            None => self.off_route_reported = false,
                        }
                        events.push(GuidanceEvent::Placement {
                            placement: cue.placement,
                        });
                        if let Some(text) = cue.new_instruction {
                            events.push(GuidanceEvent::Announcement { text });
                        }
                        if cue.arrived {
                            events.push(GuidanceEvent::Announcement {
                                text: format!("You have arrived at your {}", session.target.name),
                            });
                            Some(SessionEndReason::Arrived)
                        } else {
                            if should_announce(session.last_announced_distance_m, cue.distance_m, &self.config) {
                                session.last_announced_distance_m = Some(cue.distance_m);
                                events.push(GuidanceEvent::Announcement {
                                    text: describe(&session.target.name, cue.distance_m, cue.bearing_rad),
                                });
                            }
                            None
                        }
                    }
                    None => {
                        let timeout = Duration::from_secs(self.config.target_lost_timeout_secs);
                        if session.is_target_lost(now, timeout) {
                            events.push(GuidanceEvent::Announcement {
                                text: format!("Lost track of your {}", session.target.name),
                            });
                            Some(SessionEndReason::TargetLost)
                        } else {
                            None
                        }
                    }
                }
            }
        };

        if let Some(reason) = end
            && let Some(session) = slot.session.take()
        {
            slot.cancel_requested = false;
            self.off_route_reported = false;
            info!(target = %session.target.name, ?reason, "navigation session ended");
            events.push(GuidanceEvent::SessionEnded {
                target: session.target.name,
                reason,
            });
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Navigator adapters
// ─────────────────────────────────────────────────────────────────────────────

fn indoor_cue(session: &mut NavigationSession, state: &FusedState, renderer: &SpatialAudioRenderer) -> Option<Cue> {
    let nav = session.indoor.as_mut()?;
    let g = nav.tick(&state.pose);
    let placement = renderer
        .render(g.bearing_rad, g.elevation_rad, g.distance_m, AudioRole::Navigation)
        .map_err(|e| debug!(error = %e, "indoor cue not renderable"))
        .ok()?;
    Some(Cue {
        distance_m: g.distance_m,
        bearing_rad: g.bearing_rad,
        placement,
        arrived: g.arrived,
        new_instruction: None,
        off_route_m: None,
    })
}

fn outdoor_cue(
    session: &mut NavigationSession,
    state: &FusedState,
    latest_fix: Option<GeoCoordinate>,
    renderer: &SpatialAudioRenderer,
    config: &GuidanceConfig,
) -> Option<Cue> {
    let nav = session.outdoor.as_mut()?;
    let here = current_geo(state, latest_fix, config.gps_max_age_secs)?;
    let Some(heading) = device_heading(state) else {
        debug!("no device heading; outdoor cue withheld");
        return None;
    };

    let previous_index = nav.waypoint_index();
    let g = nav
        .tick(&here)
        .map_err(|e| debug!(error = %e, "outdoor tick failed"))
        .ok()?;
    let bearing_rad = wrap_angle(g.bearing_rad - heading);
    let placement = renderer
        .render(bearing_rad, 0.0, g.distance_to_waypoint_m, AudioRole::Navigation)
        .ok()?;
    Some(Cue {
        distance_m: g.distance_to_waypoint_m,
        bearing_rad,
        placement,
        arrived: g.arrived,
        new_instruction: (g.waypoint_index != previous_index && !g.arrived).then(|| g.instruction.clone()),
        off_route_m: g.off_route.then_some(g.cross_track_m),
    })
}

/// The user's global position: a fresh GPS fix, otherwise the fused local
/// pose carried through the map anchors.
fn current_geo(state: &FusedState, latest_fix: Option<GeoCoordinate>, max_age_secs: f64) -> Option<GeoCoordinate> {
    if let Some(fix) = latest_fix
        && fix.fix_quality != FixQuality::NoFix
        && fix.is_valid()
        && elapsed_secs(fix.timestamp_ns, state.pose.timestamp_ns) <= max_age_secs
    {
        return Some(fix);
    }
    let transform = state.frame_transform?;
    Some(transform.local_to_global(state.pose.position).with_timestamp(state.pose.timestamp_ns))
}

/// Direction the device faces, radians clockwise from north.
///
/// Derived from the fused orientation through the map anchors when possible,
/// else from the compass.
pub fn device_heading(state: &FusedState) -> Option<f64> {
    if let Some(transform) = state.frame_transform {
        let f = state.pose.forward();
        if let Some(flat) = Vec3::new(f.x, 0.0, f.z).normalized() {
            let p = state.pose.position;
            let from = transform.local_to_global(p);
            let to = transform.local_to_global(Position::new(p.x + flat.x, p.y, p.z + flat.z));
            return Some(geo::initial_bearing_rad(&from, &to));
        }
    }
    state.heading_rad
}

// ─────────────────────────────────────────────────────────────────────────────
// Announcements
// ─────────────────────────────────────────────────────────────────────────────

fn should_announce(last: Option<f64>, distance_m: f64, config: &GuidanceConfig) -> bool {
    match last {
        None => true,
        Some(last) => {
            let change = (last - distance_m).abs();
            change >= config.announce_min_change_m || change >= config.announce_min_change_ratio * last
        }
    }
}

/// Clock-face direction of a body-relative bearing (12 = straight ahead).
pub fn clock_position(bearing_rad: f64) -> u8 {
    let hour = (bearing_rad.to_degrees() / 30.0).round().rem_euclid(12.0) as u8;
    if hour == 0 { 12 } else { hour }
}

fn describe(name: &str, distance_m: f64, bearing_rad: f64) -> String {
    format!(
        "Your {name} is {distance_m:.1} metres away at {} o'clock",
        clock_position(bearing_rad)
    )
}
