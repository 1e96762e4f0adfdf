//! Result kinds returned across the navigation core.
//!
//! Off-route is a soft signal carried in guidance output, not an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global error type for the navigation core.
///
/// Nothing here is fatal: the worst case is "no guidance available", which
/// the command layer turns into a spoken message.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavError {
    /// A sensor sample was non-finite or out of range. It was dropped and the
    /// filter state is unchanged.
    #[error("Sensor fault on {source_name}: {reason}")]
    SensorFault { source_name: String, reason: String },

    /// Fusion confidence is below threshold; guidance is paused until the
    /// device re-localises.
    #[error("Tracking lost")]
    TrackingLost,

    /// A frame conversion was requested before any map anchor exists.
    #[error("No local/global transform available")]
    NoTransformAvailable,

    /// `remember` was issued without a usable pose or GPS fix.
    #[error("Insufficient localization to remember this place")]
    InsufficientLocalization,

    /// The target was stored in a different local map than the active one.
    #[error("Target map {target:?} does not match active map {active}")]
    MapMismatch { target: Option<String>, active: String },

    /// The mapping collaborator could not provide a route.
    #[error("Route unavailable: {0}")]
    RouteUnavailable(String),

    #[error("Nothing remembered as \"{0}\"")]
    ObjectNotFound(String),

    #[error("No navigation session is active")]
    NoActiveSession,

    /// The storage sink rejected a read or write.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl NavError {
    pub fn sensor_fault(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        NavError::SensorFault {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}
