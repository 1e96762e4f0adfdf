//! Anchor Log.
//!
//! Persists accepted [`MapAnchor`]s per local map so that the frame
//! transform can be rebuilt immediately after a restart instead of waiting
//! for fresh GPS fixes.

use std::sync::Arc;

use tracing::{debug, warn};
use wayfind_types::{MapAnchor, MapId};

use crate::store::{StorageSink, StoreError};

/// Append-only log of map anchors, keyed `anchor/{len}:{map}/{timestamp}`
/// where `len` is the byte length of the map id. Records are replayed in the
/// order they were written.
#[derive(Clone)]
pub struct AnchorLog {
    sink: Arc<dyn StorageSink>,
}

impl AnchorLog {
    pub fn new(sink: Arc<dyn StorageSink>) -> Self {
        Self { sink }
    }

    pub fn append(&self, map: &MapId, anchor: &MapAnchor) -> Result<(), StoreError> {
        let key = format!("{}{:020}", map_prefix(map), anchor.timestamp_ns);
        self.sink.put(&key, &serde_json::to_value(anchor)?)?;
        debug!(%map, timestamp_ns = anchor.timestamp_ns, "anchor persisted");
        Ok(())
    }

    /// The `limit` most recently written anchors of `map`, oldest first.
    /// Unreadable records are skipped.
    pub fn load_latest(&self, map: &MapId, limit: usize) -> Result<Vec<MapAnchor>, StoreError> {
        let mut anchors = Vec::new();
        for stored in self.sink.list(&map_prefix(map))? {
            if anchors.len() == limit {
                break;
            }
            match serde_json::from_value::<MapAnchor>(stored.body) {
                Ok(anchor) => anchors.push(anchor),
                Err(e) => warn!(key = %stored.key, error = %e, "skipping unreadable anchor record"),
            }
        }
        anchors.reverse();
        Ok(anchors)
    }
}

/// Length-prefixed so that no map's prefix is a prefix of another's.
fn map_prefix(map: &MapId) -> String {
    let id = map.to_string();
    format!("anchor/{}:{id}/", id.len())
}
