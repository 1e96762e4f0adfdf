//! Navigation sessions.
//!
//! A [`NavigationSession`] lives from a successful `navigate_to` until the
//! user arrives, cancels, or no valid guidance could be produced for the
//! target-lost timeout. The command surface installs sessions into a shared
//! [`SessionSlot`]; the guidance loop drives and eventually removes them.
//! Cancellation only raises a flag, so it takes effect at the next guidance
//! tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use wayfind_types::{NavError, NavMode, SpatialObject, Waypoint};

use crate::indoor::IndoorNavigator;
use crate::outdoor::OutdoorNavigator;

// ─────────────────────────────────────────────────────────────────────────────
// NavigationSession
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NavigationSession {
    pub id: Uuid,
    pub target: SpatialObject,
    /// Navigator currently producing guidance.
    pub mode: NavMode,
    pub(crate) indoor: Option<IndoorNavigator>,
    pub(crate) outdoor: Option<OutdoorNavigator>,
    pub last_announced_distance_m: Option<f64>,
    pub started_at: DateTime<Utc>,
    /// Last tick that produced valid guidance.
    pub last_guidance_at: Instant,
}

impl NavigationSession {
    pub fn indoor(target: SpatialObject, navigator: IndoorNavigator, now: Instant) -> Self {
        Self::with_navigators(target, NavMode::Indoor, Some(navigator), None, now)
    }

    pub fn outdoor(target: SpatialObject, navigator: OutdoorNavigator, now: Instant) -> Self {
        Self::with_navigators(target, NavMode::Outdoor, None, Some(navigator), now)
    }

    fn with_navigators(
        target: SpatialObject,
        mode: NavMode,
        indoor: Option<IndoorNavigator>,
        outdoor: Option<OutdoorNavigator>,
        now: Instant,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            mode,
            indoor,
            outdoor,
            last_announced_distance_m: None,
            started_at: Utc::now(),
            last_guidance_at: now,
        }
    }

    /// Keep an indoor navigator around so the mode selector can switch to it.
    pub fn with_indoor_fallback(mut self, navigator: IndoorNavigator) -> Self {
        self.indoor = Some(navigator);
        self
    }

    pub fn has_navigator(&self, mode: NavMode) -> bool {
        match mode {
            NavMode::Indoor => self.indoor.is_some(),
            NavMode::Outdoor => self.outdoor.is_some(),
        }
    }

    /// `preferred` if this session can navigate in it, otherwise the mode it
    /// was started in.
    pub fn resolve_mode(&self, preferred: NavMode) -> NavMode {
        if self.has_navigator(preferred) { preferred } else { self.mode }
    }

    pub fn route(&self) -> Option<&[Waypoint]> {
        self.outdoor.as_ref().map(|o| o.route())
    }

    pub fn is_target_lost(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_guidance_at) >= timeout
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            target: self.target.name.clone(),
            mode: self.mode,
            waypoints: self.route().map_or(0, <[Waypoint]>::len),
            last_announced_distance_m: self.last_announced_distance_m,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of a session for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub target: String,
    pub mode: NavMode,
    pub waypoints: usize,
    pub last_announced_distance_m: Option<f64>,
    pub started_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionSlot
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub(crate) session: Option<NavigationSession>,
    pub(crate) cancel_requested: bool,
}

/// The single active-session slot shared by the command surface and the
/// guidance loop.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` the active one, returning the session it replaced.
    pub fn install(&self, session: NavigationSession) -> Option<NavigationSession> {
        let mut slot = self.inner.lock();
        info!(target = %session.target.name, mode = ?session.mode, "navigation session installed");
        slot.cancel_requested = false;
        slot.session.replace(session)
    }

    /// Ask the guidance loop to end the session at its next tick.
    pub fn request_cancel(&self) -> Result<(), NavError> {
        let mut slot = self.inner.lock();
        if slot.session.is_none() {
            return Err(NavError::NoActiveSession);
        }
        slot.cancel_requested = true;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.inner.lock().session.as_ref().map(NavigationSession::summary)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indoor::IndoorConfig;
    use wayfind_types::{MapId, ObjectId, Position, QualityFlags};

    fn keys() -> SpatialObject {
        SpatialObject {
            id: ObjectId::new(),
            name: "keys".to_string(),
            class: "keys".to_string(),
            local_position: Some(Position::new(1.0, 0.0, -1.0)),
            map_id: Some(MapId::new("home")),
            geo_position: None,
            address: None,
            quality_flags: QualityFlags::HAS_LOCAL,
            confidence: 0.9,
            created_at: Utc::now(),
        }
    }

    fn session(now: Instant) -> NavigationSession {
        let target = keys();
        let nav = IndoorNavigator::start(&target, &MapId::new("home"), IndoorConfig::default()).unwrap();
        NavigationSession::indoor(target, nav, now)
    }

    #[test]
    fn cancel_without_session_fails() {
        let slot = SessionSlot::new();
        assert_eq!(slot.request_cancel(), Err(NavError::NoActiveSession));
    }

    #[test]
    fn install_replaces_and_clears_cancel() {
        let slot = SessionSlot::new();
        let now = Instant::now();
        assert!(slot.install(session(now)).is_none());
        slot.request_cancel().unwrap();
        assert!(slot.lock().cancel_requested);

        let replaced = slot.install(session(now));
        assert!(replaced.is_some());
        assert!(!slot.lock().cancel_requested);
        assert_eq!(slot.summary().unwrap().target, "keys");
    }

    #[test]
    fn resolve_mode_prefers_available_navigator() {
        let s = session(Instant::now());
        assert_eq!(s.resolve_mode(NavMode::Outdoor), NavMode::Indoor);
        assert_eq!(s.resolve_mode(NavMode::Indoor), NavMode::Indoor);
        assert!(s.route().is_none());
    }

    #[test]
    fn target_lost_after_timeout() {
        let now = Instant::now();
        let s = session(now);
        assert!(!s.is_target_lost(now + Duration::from_secs(29), Duration::from_secs(30)));
        assert!(s.is_target_lost(now + Duration::from_secs(30), Duration::from_secs(30)));
    }
}
