//! Spatial Memory.
//!
//! Remembers named objects and places together with where they were: a local
//! position in the active map, a GPS fix, or both. Every write goes through
//! the [`StorageSink`] before the call returns; reads are served from an
//! in-memory snapshot that is swapped atomically after each write.
//!
//! Re-remembering a name appends a new row. Forgetting appends a tombstone,
//! so the durable log is never rewritten.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use wayfind_memory::spatial::{MemoryConfig, RememberRequest, SpatialMemory};
//! use wayfind_memory::store::SqliteSink;
//! use wayfind_types::{MapId, Pose3D, Position};
//!
//! let sink = Arc::new(SqliteSink::open_in_memory().unwrap());
//! let memory = SpatialMemory::open(sink, MemoryConfig::default()).unwrap();
//!
//! let pose = Pose3D::at(Position::new(2.0, 0.0, -1.0), 0);
//! let id = memory
//!     .remember(RememberRequest::new("Keys", "keys").with_pose(pose, MapId::new("home")))
//!     .unwrap();
//!
//! let found = memory.find_latest("  keys ").unwrap();
//! assert_eq!(found.id, id);
//! assert!(found.has_local());
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wayfind_types::{
    GeoCoordinate, MapId, NavError, ObjectId, Pose3D, QualityFlags, SpatialObject,
};

use crate::store::{StorageSink, StoreError};

const OBJECT_PREFIX: &str = "object/";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Thresholds deciding which localisation snapshots are worth storing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Lowest fused tracking quality for which a pose is stored.
    pub min_pose_quality: f64,
    /// Worst GPS accuracy for which a fix is stored (m).
    pub max_geo_accuracy_m: f64,
    /// Confidence at or above which an object is flagged high-confidence.
    pub high_confidence_threshold: f64,
    /// GPS accuracy at which geo confidence drops to one half (m).
    pub geo_confidence_scale_m: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            min_pose_quality: 0.2,
            max_geo_accuracy_m: 30.0,
            high_confidence_threshold: 0.8,
            geo_confidence_scale_m: 10.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RememberRequest
// ─────────────────────────────────────────────────────────────────────────────

/// Everything known about an object at the moment the user asked to
/// remember it.
#[derive(Debug, Clone, PartialEq)]
pub struct RememberRequest {
    pub name: String,
    pub class: String,
    /// Fused pose snapshot and the map it was taken in.
    pub local: Option<(Pose3D, MapId)>,
    /// Latest GPS fix.
    pub geo: Option<GeoCoordinate>,
    pub address: Option<String>,
    /// The detector is currently seeing the object.
    pub actively_tracked: bool,
}

impl RememberRequest {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            local: None,
            geo: None,
            address: None,
            actively_tracked: false,
        }
    }

    pub fn with_pose(mut self, pose: Pose3D, map: MapId) -> Self {
        self.local = Some((pose, map));
        self
    }

    pub fn with_geo(mut self, geo: GeoCoordinate, address: Option<String>) -> Self {
        self.geo = Some(geo);
        self.address = address;
        self
    }

    pub fn actively_tracked(mut self, tracked: bool) -> Self {
        self.actively_tracked = tracked;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Durable record
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ObjectRecord {
    Object(SpatialObject),
    Tombstone {
        id: ObjectId,
        forgotten_at: DateTime<Utc>,
    },
}

fn object_key(normalized_name: &str, id: ObjectId) -> String {
    format!("{OBJECT_PREFIX}{normalized_name}/{id}")
}

// ─────────────────────────────────────────────────────────────────────────────
// SpatialMemory
// ─────────────────────────────────────────────────────────────────────────────

/// Durable, snapshot-read store of [`SpatialObject`]s.
pub struct SpatialMemory {
    config: MemoryConfig,
    sink: Arc<dyn StorageSink>,
    /// Live objects, newest first.
    snapshot: RwLock<Arc<Vec<SpatialObject>>>,
    /// Serialises durable writes and snapshot swaps.
    writer: Mutex<()>,
}

impl SpatialMemory {
    /// Load every live object from `sink`.
    pub fn open(sink: Arc<dyn StorageSink>, config: MemoryConfig) -> Result<Self, NavError> {
        let objects = load_live_objects(sink.as_ref())?;
        info!(objects = objects.len(), "spatial memory loaded");
        Ok(Self {
            config,
            sink,
            snapshot: RwLock::new(Arc::new(objects)),
            writer: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Store a new row for `request.name`.
    ///
    /// Unusable localisation snapshots are dropped; with neither a usable
    /// pose nor a usable fix nothing is stored and
    /// [`NavError::InsufficientLocalization`] is returned.
    pub fn remember(&self, request: RememberRequest) -> Result<ObjectId, NavError> {
        let object = self.build_object(request)?;
        let key = object_key(&object.normalized_name(), object.id);
        let record = serde_json::to_value(ObjectRecord::Object(object.clone())).map_err(StoreError::from)?;

        let _guard = self.writer.lock();
        self.sink.put(&key, &record)?;
        let mut next = Vec::with_capacity(self.snapshot.read().len() + 1);
        next.push(object.clone());
        next.extend(self.snapshot.read().iter().cloned());
        *self.snapshot.write() = Arc::new(next);

        info!(
            name = %object.name,
            id = %object.id,
            local = object.has_local(),
            global = object.has_global(),
            confidence = object.confidence,
            "object remembered"
        );
        Ok(object.id)
    }

    /// Newest live object remembered under `name` (case-insensitive,
    /// trimmed).
    pub fn find_latest(&self, name: &str) -> Result<SpatialObject, NavError> {
        let key = SpatialObject::normalize_name(name);
        self.snapshot
            .read()
            .iter()
            .find(|o| o.normalized_name() == key)
            .cloned()
            .ok_or_else(|| NavError::ObjectNotFound(name.trim().to_string()))
    }

    pub fn get(&self, id: ObjectId) -> Option<SpatialObject> {
        self.snapshot.read().iter().find(|o| o.id == id).cloned()
    }

    /// Every live object, newest first.
    pub fn list_all(&self) -> Arc<Vec<SpatialObject>> {
        Arc::clone(&self.snapshot.read())
    }

    /// Every live row for `name`, newest first.
    pub fn history(&self, name: &str) -> Vec<SpatialObject> {
        let key = SpatialObject::normalize_name(name);
        self.snapshot
            .read()
            .iter()
            .filter(|o| o.normalized_name() == key)
            .cloned()
            .collect()
    }

    /// Tombstone one row. Returns the forgotten object.
    pub fn forget(&self, id: ObjectId) -> Result<SpatialObject, NavError> {
        let _guard = self.writer.lock();
        let object = self
            .get(id)
            .ok_or_else(|| NavError::ObjectNotFound(id.to_string()))?;

        let record = serde_json::to_value(ObjectRecord::Tombstone {
            id,
            forgotten_at: Utc::now(),
        })
        .map_err(StoreError::from)?;
        self.sink.put(&object_key(&object.normalized_name(), id), &record)?;

        let next: Vec<SpatialObject> = self
            .snapshot
            .read()
            .iter()
            .filter(|o| o.id != id)
            .cloned()
            .collect();
        *self.snapshot.write() = Arc::new(next);

        info!(name = %object.name, %id, "object forgotten");
        Ok(object)
    }

    fn build_object(&self, request: RememberRequest) -> Result<SpatialObject, NavError> {
        let RememberRequest {
            name,
            class,
            local,
            geo,
            address,
            actively_tracked,
        } = request;

        let local = local.filter(|(pose, _)| {
            let usable = pose.is_finite() && pose.tracking_quality() >= self.config.min_pose_quality;
            if !usable {
                debug!(quality = pose.tracking_quality(), "pose snapshot not usable");
            }
            usable
        });
        let geo = geo.filter(|g| {
            let usable = g.fix_quality.has_position()
                && g.is_valid()
                && g.horizontal_accuracy_m <= self.config.max_geo_accuracy_m;
            if !usable {
                debug!(accuracy_m = g.horizontal_accuracy_m, "geo snapshot not usable");
            }
            usable
        });

        if local.is_none() && geo.is_none() {
            warn!(%name, "cannot remember without a usable pose or fix");
            return Err(NavError::InsufficientLocalization);
        }

        let local_confidence = local.as_ref().map(|(pose, _)| pose.tracking_quality());
        let geo_confidence = geo
            .as_ref()
            .map(|g| 1.0 / (1.0 + g.horizontal_accuracy_m / self.config.geo_confidence_scale_m));
        let confidence = local_confidence
            .into_iter()
            .chain(geo_confidence)
            .fold(0.0, f64::max);

        let mut flags = QualityFlags::empty();
        flags.set(QualityFlags::HAS_LOCAL, local.is_some());
        flags.set(QualityFlags::HAS_GLOBAL, geo.is_some());
        flags.set(
            QualityFlags::HIGH_CONFIDENCE,
            confidence >= self.config.high_confidence_threshold,
        );
        flags.set(QualityFlags::ACTIVELY_TRACKED, actively_tracked);

        let (local_position, map_id) = match local {
            Some((pose, map)) => (Some(pose.position), Some(map)),
            None => (None, None),
        };

        Ok(SpatialObject {
            id: ObjectId::new(),
            name: name.trim().to_string(),
            class,
            local_position,
            map_id,
            address: geo.and(address),
            geo_position: geo,
            quality_flags: flags,
            confidence,
            created_at: Utc::now(),
        })
    }
}

/// Replay the object log into the live set, newest first.
fn load_live_objects(sink: &dyn StorageSink) -> Result<Vec<SpatialObject>, StoreError> {
    let mut forgotten = HashSet::new();
    let mut live = Vec::new();
    for stored in sink.list(OBJECT_PREFIX)? {
        match serde_json::from_value::<ObjectRecord>(stored.body) {
            Ok(ObjectRecord::Tombstone { id, .. }) => {
                forgotten.insert(id);
            }
            Ok(ObjectRecord::Object(object)) => {
                if !forgotten.contains(&object.id) {
                    live.push(object);
                }
            }
            Err(e) => warn!(key = %stored.key, error = %e, "skipping unreadable object record"),
        }
    }
    Ok(live)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteSink;
    use wayfind_types::{FixQuality, Position};

    fn memory() -> SpatialMemory {
        let sink = Arc::new(SqliteSink::open_in_memory().unwrap());
        SpatialMemory::open(sink, MemoryConfig::default()).unwrap()
    }

    fn good_pose() -> Pose3D {
        Pose3D::at(Position::new(2.0, 0.0, -1.0), 0)
    }

    fn fix(accuracy_m: f64) -> GeoCoordinate {
        GeoCoordinate::fix(1.3521, 103.8198, 0.0, accuracy_m, FixQuality::Fix3d, 0)
    }

    #[test]
    fn remember_with_pose_sets_local_flags() {
        let memory = memory();
        let id = memory
            .remember(RememberRequest::new("Wallet", "wallet").with_pose(good_pose(), MapId::new("home")))
            .unwrap();
        let obj = memory.get(id).unwrap();
        assert!(obj.quality_flags.contains(QualityFlags::HAS_LOCAL | QualityFlags::HIGH_CONFIDENCE));
        assert!(!obj.quality_flags.contains(QualityFlags::HAS_GLOBAL));
        assert_eq!(obj.map_id, Some(MapId::new("home")));
        assert_eq!(obj.confidence, 1.0);
    }

    #[test]
    fn remember_with_only_geo_keeps_address() {
        let memory = memory();
        let id = memory
            .remember(RememberRequest::new("car", "place").with_geo(fix(5.0), Some("Orchard Rd".into())))
            .unwrap();
        let obj = memory.get(id).unwrap();
        assert!(obj.has_global() && !obj.has_local());
        assert_eq!(obj.address.as_deref(), Some("Orchard Rd"));
        // 1 / (1 + 5/10)
        assert!((obj.confidence - 2.0 / 3.0).abs() < 1e-12);
        assert!(!obj.quality_flags.contains(QualityFlags::HIGH_CONFIDENCE));
    }

    #[test]
    fn unusable_snapshots_are_dropped() {
        let memory = memory();
        let mut lost = good_pose();
        lost.covariance[0][0] = 100.0;
        let id = memory
            .remember(
                RememberRequest::new("bag", "bag")
                    .with_pose(lost, MapId::new("home"))
                    .with_geo(fix(12.0), None),
            )
            .unwrap();
        let obj = memory.get(id).unwrap();
        assert!(!obj.has_local());
        assert!(obj.has_global());
    }

    #[test]
    fn nothing_usable_is_insufficient_localization() {
        let memory = memory();
        let mut no_fix = fix(3.0);
        no_fix.fix_quality = FixQuality::NoFix;
        let err = memory
            .remember(RememberRequest::new("bag", "bag").with_geo(fix(80.0), None))
            .unwrap_err();
        assert_eq!(err, NavError::InsufficientLocalization);
        let err = memory
            .remember(RememberRequest::new("bag", "bag").with_geo(no_fix, None))
            .unwrap_err();
        assert_eq!(err, NavError::InsufficientLocalization);
        assert!(memory.list_all().is_empty());
    }

    #[test]
    fn repeated_remember_appends_and_latest_wins() {
        let memory = memory();
        let first = memory
            .remember(RememberRequest::new("wallet", "wallet").with_pose(good_pose(), MapId::new("home")))
            .unwrap();
        let second = memory
            .remember(RememberRequest::new("WALLET ", "wallet").with_pose(good_pose(), MapId::new("home")))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(memory.find_latest("Wallet").unwrap().id, second);
        let history = memory.history("wallet");
        assert_eq!(history.iter().map(|o| o.id).collect::<Vec<_>>(), vec![second, first]);
    }

    #[test]
    fn find_latest_missing_is_object_not_found() {
        assert_eq!(
            memory().find_latest(" umbrella "),
            Err(NavError::ObjectNotFound("umbrella".to_string()))
        );
    }

    #[test]
    fn forget_hides_only_that_row() {
        let memory = memory();
        let older = memory
            .remember(RememberRequest::new("keys", "keys").with_geo(fix(3.0), None))
            .unwrap();
        let newer = memory
            .remember(RememberRequest::new("keys", "keys").with_geo(fix(3.0), None))
            .unwrap();
        memory.forget(newer).unwrap();
        assert_eq!(memory.find_latest("keys").unwrap().id, older);
        assert!(matches!(memory.forget(newer), Err(NavError::ObjectNotFound(_))));
    }

    #[test]
    fn reopening_replays_log_and_tombstones() {
        let sink: Arc<dyn StorageSink> = Arc::new(SqliteSink::open_in_memory().unwrap());
        let memory = SpatialMemory::open(Arc::clone(&sink), MemoryConfig::default()).unwrap();
        let kept = memory
            .remember(RememberRequest::new("door", "door").with_pose(good_pose(), MapId::new("home")))
            .unwrap();
        let gone = memory
            .remember(RememberRequest::new("mug", "mug").with_pose(good_pose(), MapId::new("home")))
            .unwrap();
        memory.forget(gone).unwrap();
        drop(memory);

        let reopened = SpatialMemory::open(sink, MemoryConfig::default()).unwrap();
        let all = reopened.list_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, kept);
    }

    #[test]
    fn list_all_is_newest_first() {
        let memory = memory();
        let a = memory
            .remember(RememberRequest::new("a", "x").with_geo(fix(1.0), None))
            .unwrap();
        let b = memory
            .remember(RememberRequest::new("b", "x").with_geo(fix(1.0), None))
            .unwrap();
        let ids: Vec<ObjectId> = memory.list_all().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn actively_tracked_flag_is_recorded() {
        let memory = memory();
        let id = memory
            .remember(
                RememberRequest::new("cup", "cup")
                    .with_pose(good_pose(), MapId::new("home"))
                    .actively_tracked(true),
            )
            .unwrap();
        assert!(memory.get(id).unwrap().quality_flags.contains(QualityFlags::ACTIVELY_TRACKED));
    }
}
