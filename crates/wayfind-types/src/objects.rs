//! Remembered objects and places.

use std::fmt;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::{Pose3D, Position};
use crate::geo::GeoCoordinate;

/// Identifier of a stored [`SpatialObject`] row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a local map maintained by the visual-odometry front-end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapId(pub String);

impl MapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

bitflags! {
    /// Summary of how well a [`SpatialObject`] is localised.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct QualityFlags: u8 {
        const HAS_LOCAL = 0b0001;
        const HAS_GLOBAL = 0b0010;
        const HIGH_CONFIDENCE = 0b0100;
        const ACTIVELY_TRACKED = 0b1000;
    }
}

/// A named object or place the user asked the device to remember.
///
/// At least one of `local_position` and `geo_position` is always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialObject {
    pub id: ObjectId,
    /// Display name as spoken by the user.
    pub name: String,
    /// Detector class or user-supplied category (e.g. `"wallet"`, `"door"`).
    pub class: String,
    pub local_position: Option<Position>,
    /// Map in which `local_position` is valid.
    pub map_id: Option<MapId>,
    pub geo_position: Option<GeoCoordinate>,
    /// Reverse-geocoded street address, when one was available.
    pub address: Option<String>,
    pub quality_flags: QualityFlags,
    /// Localisation confidence in `[0, 1]`.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl SpatialObject {
    /// Canonical lookup key for a user-facing name: trimmed and lower-cased.
    pub fn normalize_name(name: &str) -> String {
        name.trim().to_lowercase()
    }

    pub fn normalized_name(&self) -> String {
        Self::normalize_name(&self.name)
    }

    pub fn has_local(&self) -> bool {
        self.local_position.is_some()
    }

    pub fn has_global(&self) -> bool {
        self.geo_position.is_some()
    }

    /// `true` when the local position was recorded in `map`.
    pub fn is_in_map(&self, map: &MapId) -> bool {
        self.local_position.is_some() && self.map_id.as_ref() == Some(map)
    }
}

/// A simultaneous (local pose, GPS fix) pair tying the active local map to
/// the globe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapAnchor {
    pub local: Pose3D,
    pub geo: GeoCoordinate,
    /// Sensor-clock time at which the pair was accepted (ns).
    pub timestamp_ns: u64,
    pub gps_accuracy_m: f64,
    /// Fusion tracking quality of `local` at acceptance.
    pub vio_confidence: f64,
}
