//! Map Anchor Store and the local ↔ global Frame Transform.
//!
//! A [`MapAnchor`] is a (fused pose, GPS fix) pair captured at the same
//! instant. From the anchors collected for the active map the store derives a
//! [`FrameTransform`], the one and only bridge between [`Position`] and
//! [`GeoCoordinate`].
//!
//! The global side is flattened into an east/north/up tangent plane around
//! the most recent anchor's fix and re-expressed with local axes,
//! `m = (east, up, −north)`. The transform is then a rotation about the
//! vertical plus a translation:
//!
//! ```text
//! local = T + R_y(yaw) · m
//! ```
//!
//! - One or two anchors: translation only (`yaw = 0`, i.e. local `-Z` is
//!   assumed to point north).
//! - Three or more anchors spread over at least a metre: closed-form 2-D
//!   least-squares fit of yaw and horizontal translation over the most
//!   recent anchors; the vertical offset is the mean residual.
//!
//! # Example
//!
//! ```rust
//! use wayfind_perception::anchor::{AnchorConfig, MapAnchorStore};
//! use wayfind_types::{GeoCoordinate, Pose3D, Position};
//!
//! let mut store = MapAnchorStore::new(AnchorConfig::default());
//! let pose = Pose3D::at(Position::origin(), 0);
//! let fix = GeoCoordinate::new(1.3521, 103.8198, 0.0);
//! assert!(store.add_anchor_if_eligible(&pose, &fix));
//!
//! let geo = store.local_to_global(Position::origin()).unwrap();
//! assert_eq!(geo.latitude_deg, 1.3521);
//! assert_eq!(geo.longitude_deg, 103.8198);
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wayfind_types::frame::UP;
use wayfind_types::geo::{EnuOffset, enu_offset, from_enu};
use wayfind_types::{
    FixQuality, GeoCoordinate, MapAnchor, NavError, Pose3D, Position, Quaternion, Vec3,
};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Anchor acceptance thresholds and fitting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Worst GPS 1-σ horizontal accuracy accepted for an anchor (m).
    pub max_anchor_accuracy_m: f64,
    /// Lowest fused tracking quality accepted for an anchor.
    pub min_tracking_quality: f64,
    /// Largest gap between the pose and the fix timestamps (ms).
    pub pairing_window_ms: u64,
    /// Shortest spacing between two consecutive anchors (ms).
    pub min_anchor_interval_ms: u64,
    /// Anchors needed before yaw is fitted instead of assumed.
    pub fit_min_anchors: usize,
    /// Number of most recent anchors used by the fit.
    pub fit_window: usize,
    /// Smallest horizontal spread of the fitted anchors (m).
    pub min_fit_spread_m: f64,
    /// Anchors retained per map.
    pub max_retained: usize,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            max_anchor_accuracy_m: 10.0,
            min_tracking_quality: 0.2,
            pairing_window_ms: 500,
            min_anchor_interval_ms: 1_000,
            fit_min_anchors: 3,
            fit_window: 5,
            min_fit_spread_m: 1.0,
            max_retained: 50,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FrameTransform
// ────────────────────────────────────────────────────────────────────────────

/// Rigid transform between the active local map and a tangent plane at
/// `reference`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTransform {
    /// Fix of the most recent anchor; origin of the tangent plane.
    pub reference: GeoCoordinate,
    /// Rotation about local `+Y` taking tangent-plane axes onto local axes.
    pub yaw_rad: f64,
    /// Local position of the tangent-plane origin.
    pub translation: Vec3,
    /// RMS horizontal fit residual (m); `0` for translation-only transforms.
    pub residual_m: f64,
    /// GPS accuracy of the reference anchor (m).
    pub reference_accuracy_m: f64,
    pub anchor_count: usize,
}

impl FrameTransform {
    /// Translation-only transform pinning `anchor.local` to `anchor.geo`.
    pub fn translation_only(anchor: &MapAnchor, anchor_count: usize) -> Self {
        Self {
            reference: anchor.geo,
            yaw_rad: 0.0,
            translation: anchor.local.position.as_vec3(),
            residual_m: 0.0,
            reference_accuracy_m: anchor.gps_accuracy_m,
            anchor_count,
        }
    }

    /// Horizontal accuracy reported on converted coordinates (m).
    pub fn accuracy_m(&self) -> f64 {
        self.residual_m.max(self.reference_accuracy_m)
    }

    /// Convert a local position into a global fix.
    pub fn local_to_global(&self, position: Position) -> GeoCoordinate {
        let m = self.rotation().inverse_rotate(position.as_vec3() - self.translation);
        let offset = EnuOffset {
            east_m: m.x,
            north_m: -m.z,
            up_m: m.y,
        };
        GeoCoordinate {
            horizontal_accuracy_m: self.accuracy_m(),
            fix_quality: FixQuality::Fix3d,
            ..from_enu(&self.reference, offset)
        }
    }

    /// Convert a global fix into the local frame.
    pub fn global_to_local(&self, geo: &GeoCoordinate) -> Position {
        let m = tangent_vector(&self.reference, geo);
        Position::from_vec3(self.translation + self.rotation().rotate(m))
    }

    fn rotation(&self) -> Quaternion {
        Quaternion::from_axis_angle(UP, self.yaw_rad)
    }
}

/// Tangent-plane offset of `geo` from `reference` in local axes.
fn tangent_vector(reference: &GeoCoordinate, geo: &GeoCoordinate) -> Vec3 {
    let off = enu_offset(reference, geo);
    Vec3::new(off.east_m, off.up_m, -off.north_m)
}

// ────────────────────────────────────────────────────────────────────────────
// MapAnchorStore
// ────────────────────────────────────────────────────────────────────────────

/// Anchors of the active local map and the transform derived from them.
///
/// Owned by the fusion worker; the fusion engine receives copies of the
/// transform through `set_frame_transform`.
#[derive(Debug, Clone)]
pub struct MapAnchorStore {
    config: AnchorConfig,
    /// Oldest first. The first `restored` entries came from storage.
    anchors: Vec<MapAnchor>,
    restored: usize,
    transform: Option<FrameTransform>,
}

impl MapAnchorStore {
    pub fn new(config: AnchorConfig) -> Self {
        Self {
            config,
            anchors: Vec::new(),
            restored: 0,
            transform: None,
        }
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Oldest first.
    pub fn anchors(&self) -> &[MapAnchor] {
        &self.anchors
    }

    pub fn latest(&self) -> Option<&MapAnchor> {
        self.anchors.last()
    }

    pub fn has_transform(&self) -> bool {
        self.transform.is_some()
    }

    pub fn transform(&self) -> Option<FrameTransform> {
        self.transform
    }

    /// Record `(pose, geo)` as an anchor when both are trustworthy and
    /// simultaneous. Returns `true` when an anchor was added.
    pub fn add_anchor_if_eligible(&mut self, pose: &Pose3D, geo: &GeoCoordinate) -> bool {
        if let Err(reason) = self.check_eligible(pose, geo) {
            debug!(reason, "anchor candidate rejected");
            return false;
        }

        let anchor = MapAnchor {
            local: *pose,
            geo: *geo,
            timestamp_ns: pose.timestamp_ns.max(geo.timestamp_ns),
            gps_accuracy_m: geo.horizontal_accuracy_m,
            vio_confidence: pose.tracking_quality(),
        };
        self.anchors.push(anchor);
        self.enforce_retention();
        self.recompute();
        info!(
            anchors = self.anchors.len(),
            accuracy_m = geo.horizontal_accuracy_m,
            yaw_rad = ?self.transform.map(|t| t.yaw_rad),
            "map anchor added"
        );
        true
    }

    /// Replace the anchors with ones reloaded from storage, given in the
    /// order they were recorded. Invalid entries are skipped.
    ///
    /// Sensor timestamps restart with every session, so restored anchors are
    /// ordered by position rather than by `timestamp_ns`. They always rank
    /// older than anchors added afterwards and never rate-limit them.
    pub fn restore(&mut self, anchors: Vec<MapAnchor>) {
        self.anchors = anchors
            .into_iter()
            .filter(|a| a.local.is_finite() && a.geo.is_valid() && a.geo.fix_quality.has_position())
            .collect();
        self.restored = self.anchors.len();
        self.enforce_retention();
        self.recompute();
        info!(anchors = self.anchors.len(), "map anchors restored");
    }

    /// Forget every anchor, e.g. when the active map changes.
    pub fn clear(&mut self) {
        self.anchors.clear();
        self.restored = 0;
        self.transform = None;
    }

    pub fn local_to_global(&self, position: Position) -> Result<GeoCoordinate, NavError> {
        self.transform
            .map(|t| t.local_to_global(position))
            .ok_or(NavError::NoTransformAvailable)
    }

    pub fn global_to_local(&self, geo: &GeoCoordinate) -> Result<Position, NavError> {
        self.transform
            .map(|t| t.global_to_local(geo))
            .ok_or(NavError::NoTransformAvailable)
    }

    fn check_eligible(&self, pose: &Pose3D, geo: &GeoCoordinate) -> Result<(), &'static str> {
        if !geo.fix_quality.has_position() {
            return Err("no fix");
        }
        if !geo.is_valid() || !pose.is_finite() {
            return Err("invalid values");
        }
        if geo.horizontal_accuracy_m > self.config.max_anchor_accuracy_m {
            return Err("gps accuracy above threshold");
        }
        if pose.tracking_quality() < self.config.min_tracking_quality {
            return Err("tracking quality below threshold");
        }
        let gap_ns = pose.timestamp_ns.abs_diff(geo.timestamp_ns);
        if gap_ns > self.config.pairing_window_ms * 1_000_000 {
            return Err("pose and fix not simultaneous");
        }
        if let Some(last) = self.anchors.last().filter(|_| self.anchors.len() > self.restored) {
            let since_ns = pose.timestamp_ns.max(geo.timestamp_ns).saturating_sub(last.timestamp_ns);
            if since_ns < self.config.min_anchor_interval_ms * 1_000_000 {
                return Err("too soon after previous anchor");
            }
        }
        Ok(())
    }

    fn enforce_retention(&mut self) {
        let cap = self.config.max_retained.max(1);
        if self.anchors.len() > cap {
            let excess = self.anchors.len() - cap;
            self.anchors.drain(..excess);
            self.restored = self.restored.saturating_sub(excess);
        }
    }

    fn recompute(&mut self) {
        let Some(latest) = self.anchors.last() else {
            self.transform = None;
            return;
        };
        let count = self.anchors.len();
        let translation_only = FrameTransform::translation_only(latest, count);

        let fit_min = self.config.fit_min_anchors.max(3);
        if count < fit_min {
            self.transform = Some(translation_only);
            return;
        }
        let window = self.config.fit_window.max(fit_min).min(count);
        let recent = &self.anchors[count - window..];
        self.transform = Some(
            fit_rigid_2d(recent, &latest.geo, self.config.min_fit_spread_m)
                .map(|mut t| {
                    t.anchor_count = count;
                    t.reference_accuracy_m = latest.gps_accuracy_m;
                    t
                })
                .unwrap_or(translation_only),
        );
    }
}

/// Closed-form least-squares yaw + translation between tangent-plane anchor
/// positions `m` and local positions `l` over the x-z plane.
///
/// `None` when the anchors are spread over less than `min_spread_m`.
fn fit_rigid_2d(anchors: &[MapAnchor], reference: &GeoCoordinate, min_spread_m: f64) -> Option<FrameTransform> {
    let n = anchors.len() as f64;
    let pairs: Vec<(Vec3, Vec3)> = anchors
        .iter()
        .map(|a| (tangent_vector(reference, &a.geo), a.local.position.as_vec3()))
        .collect();

    let m_mean = pairs.iter().fold(Vec3::zero(), |acc, (m, _)| acc + *m) * (1.0 / n);
    let l_mean = pairs.iter().fold(Vec3::zero(), |acc, (_, l)| acc + *l) * (1.0 / n);

    let spread = pairs
        .iter()
        .map(|(m, _)| (m.x - m_mean.x).hypot(m.z - m_mean.z))
        .fold(0.0, f64::max);
    if spread < min_spread_m {
        debug!(spread, "anchors too close together for a yaw fit");
        return None;
    }

    let (mut c, mut s) = (0.0, 0.0);
    for (m, l) in &pairs {
        let a = *m - m_mean;
        let b = *l - l_mean;
        c += a.x * b.x + a.z * b.z;
        s += a.z * b.x - a.x * b.z;
    }
    if c.hypot(s) < 1e-9 {
        return None;
    }
    let yaw_rad = s.atan2(c);
    let rotation = Quaternion::from_axis_angle(UP, yaw_rad);

    let rotated_mean = rotation.rotate(m_mean);
    let vertical = pairs.iter().map(|(m, l)| l.y - m.y).sum::<f64>() / n;
    let translation = Vec3::new(l_mean.x - rotated_mean.x, vertical, l_mean.z - rotated_mean.z);

    let sq_err: f64 = pairs
        .iter()
        .map(|(m, l)| {
            let predicted = translation + rotation.rotate(*m);
            (l.x - predicted.x).powi(2) + (l.z - predicted.z).powi(2)
        })
        .sum();

    Some(FrameTransform {
        reference: *reference,
        yaw_rad,
        translation,
        residual_m: (sq_err / n).sqrt(),
        reference_accuracy_m: 0.0,
        anchor_count: anchors.len(),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
