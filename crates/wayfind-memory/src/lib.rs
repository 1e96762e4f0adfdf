//! `wayfind-memory` – what the device remembers.
//!
//! Persists remembered places and map anchors through a small append-only
//! storage abstraction backed by a local SQLite substrate.
//!
//! # Modules
//!
//! - [`store`] – the [`StorageSink`][store::StorageSink] trait and its SQLite
//!   implementation [`SqliteSink`][store::SqliteSink].
//! - [`spatial`] – [`SpatialMemory`][spatial::SpatialMemory]: named objects
//!   and places with local and/or global positions, served from an atomically
//!   swapped snapshot.
//! - [`anchors`] – [`AnchorLog`][anchors::AnchorLog]: per-map history of
//!   accepted map anchors, reloaded at start-up.

pub mod anchors;
pub mod spatial;
pub mod store;

pub use anchors::AnchorLog;
pub use spatial::{MemoryConfig, RememberRequest, SpatialMemory};
pub use store::{SqliteSink, StorageSink, StoreError, StoredRecord};
