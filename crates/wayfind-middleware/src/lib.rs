//! `wayfind-middleware` – the plumbing between sensors, fusion and guidance.
//!
//! Moves data without caring about its meaning.
//!
//! # Modules
//!
//! - [`bus`] – the latest-wins [`SensorBus`] feeding the fusion worker and the
//!   broadcast [`GuidanceBus`] carrying guidance output to the audio mixer and
//!   the command layer.

pub mod bus;

pub use bus::{DEFAULT_MAP, GuidanceBus, GuidanceReceiver, SensorBus, SensorReading, SensorSubscriber, SensorTopic};
