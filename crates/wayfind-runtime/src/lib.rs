//! `wayfind-runtime` – the navigation engine.
//!
//! Turns fused pose and remembered objects into spoken and spatial-audio
//! guidance. Three concurrent activities share state through the buses in
//! `wayfind-middleware` and a single session slot:
//!
//! ```text
//!  sensors ──► SensorBus ──► FusionWorker ──► PoseHandle ──► GuidanceLoop ──► GuidanceBus
//!                                                 ▲               ▲
//!                                  Assistant ─────┴── SessionSlot ┘
//! ```
//!
//! # Modules
//!
//! - [`worker`] – [`FusionWorker`][worker::FusionWorker]: the only writer of
//!   the pose. Applies IMU, visual and GPS readings in arrival order, grows
//!   and persists map anchors, and reloads them when the active map changes.
//! - [`guidance`] – [`GuidanceLoop`][guidance::GuidanceLoop]: the fixed-rate
//!   tick that drives the active session and publishes
//!   [`GuidanceEvent`][wayfind_types::GuidanceEvent]s.
//! - [`assistant`] – [`Assistant`][assistant::Assistant]: the command surface
//!   (remember, navigate, cancel, reroute, list, forget).
//! - [`indoor`] / [`outdoor`] – the two navigators. Indoor guidance is
//!   relative to the body frame in the local map; outdoor guidance follows a
//!   waypoint route on the globe.
//! - [`mode`] – [`ModeSelector`][mode::ModeSelector]: hysteretic
//!   indoor/outdoor switching on GPS fix quality.
//! - [`audio`] – [`SpatialAudioRenderer`][audio::SpatialAudioRenderer]:
//!   bearing and distance to cue placement, gain and cadence.
//! - [`session`] – [`NavigationSession`][session::NavigationSession] and the
//!   shared [`SessionSlot`][session::SessionSlot].
//! - [`services`] – the [`MappingService`][services::MappingService]
//!   collaborator for routes and addresses.
//! - [`hysteresis`] – streak and dwell counters.
//! - [`watchdog`] – silent sensor lane detection.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP export.

pub mod assistant;
pub mod audio;
pub mod guidance;
pub mod hysteresis;
pub mod indoor;
pub mod mode;
pub mod outdoor;
pub mod services;
pub mod session;
pub mod telemetry;
pub mod watchdog;
pub mod worker;

pub use assistant::{Assistant, AssistantConfig, AssistantStatus};
pub use audio::{AudioConfig, SpatialAudioRenderer};
pub use guidance::{GuidanceConfig, GuidanceLoop, clock_position, device_heading};
pub use hysteresis::{DwellTimer, StreakCounter};
pub use indoor::{IndoorConfig, IndoorGuidance, IndoorNavigator, relative_polar};
pub use mode::{ModeChange, ModeConfig, ModeSelector, ModeState};
pub use outdoor::{OutdoorConfig, OutdoorGuidance, OutdoorNavigator};
pub use services::MappingService;
pub use session::{NavigationSession, SessionSlot, SessionSummary};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use watchdog::{SensorWatchdog, TopicHealth, WatchdogConfig};
pub use worker::FusionWorker;
