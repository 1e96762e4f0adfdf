//! Guidance vocabulary shared between the navigators, the audio renderer and
//! the command layer.

use serde::{Deserialize, Serialize};

use crate::geo::GeoCoordinate;

/// Which navigator is (or should be) producing guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavMode {
    Indoor,
    Outdoor,
}

/// One step of a route supplied by the mapping collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub geo: GeoCoordinate,
    /// Spoken instruction for this leg (e.g. "turn left onto Orchard Road").
    pub instruction: String,
}

impl Waypoint {
    pub fn new(geo: GeoCoordinate, instruction: impl Into<String>) -> Self {
        Self {
            geo,
            instruction: instruction.into(),
        }
    }
}

/// Why a sound is being played. The external mixer ducks lower-priority
/// roles underneath higher ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioRole {
    /// An object the detector currently sees.
    Detection,
    /// The active navigation target.
    Navigation,
    /// Safety or status alerts (tracking lost, off route).
    Alert,
}

impl AudioRole {
    /// Mixer priority; higher wins.
    pub fn priority(self) -> u8 {
        match self {
            AudioRole::Detection => 1,
            AudioRole::Navigation => 2,
            AudioRole::Alert => 3,
        }
    }
}

/// Listener-relative placement of one cue.
///
/// The listener sits at the origin facing `-Z`, `+X` to the right and `+Y`
/// up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioPlacement {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Linear gain in `[0, 1]`.
    pub gain: f64,
    /// Pulse repetition rate (Hz).
    pub cadence_hz: f64,
    pub role: AudioRole,
}

/// Why a navigation session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Arrived,
    Cancelled,
    /// No valid guidance could be produced for too long.
    TargetLost,
}

/// Output of the guidance loop, consumed by the external audio mixer and
/// speech front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuidanceEvent {
    /// Where to play the next cue.
    Placement { placement: AudioPlacement },
    /// Something worth saying out loud.
    Announcement { text: String },
    SessionStarted { target: String, mode: NavMode },
    ModeChanged { from: NavMode, to: NavMode },
    OffRoute { cross_track_m: f64 },
    Rerouted { waypoints: usize },
    TrackingLost,
    TrackingRegained,
    SessionEnded { target: String, reason: SessionEndReason },
}
