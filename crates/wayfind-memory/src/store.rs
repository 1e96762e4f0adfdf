//! Storage Sink.
//!
//! The durable side of the navigation core is a plain append-only key/value
//! log of JSON records. Readers always see the newest record for a key first;
//! nothing is ever updated in place, so a key's full history stays available.
//!
//! # Storage layout
//!
//! [`SqliteSink`] keeps every record in a single `records` table:
//!
//! | column      | type    | description                                 |
//! |-------------|---------|---------------------------------------------|
//! | seq         | INTEGER | Autoincrement primary key (write order)     |
//! | key         | TEXT    | Hierarchical key, e.g. `object/wallet/<id>` |
//! | written_at  | TEXT    | RFC-3339 write time (UTC)                   |
//! | body        | TEXT    | JSON record                                 |
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use wayfind_memory::store::{SqliteSink, StorageSink};
//!
//! let sink = SqliteSink::open_in_memory().unwrap();
//! sink.put("object/keys/1", &json!({"n": 1})).unwrap();
//! sink.put("object/keys/1", &json!({"n": 2})).unwrap();
//!
//! let latest = sink.get_latest("object/keys/1").unwrap().unwrap();
//! assert_eq!(latest.body["n"], 2);
//! assert_eq!(sink.list("object/").unwrap().len(), 2);
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;
use wayfind_types::NavError;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt timestamp on record {key}: {reason}")]
    Timestamp { key: String, reason: String },
}

impl From<StoreError> for NavError {
    fn from(e: StoreError) -> Self {
        NavError::Storage(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StorageSink
// ─────────────────────────────────────────────────────────────────────────────

/// One stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub written_at: DateTime<Utc>,
    pub body: Value,
}

/// Append-only key/value persistence used by spatial memory and the anchor
/// log.
pub trait StorageSink: Send + Sync {
    /// Append `record` under `key`. Returns once the write is durable.
    fn put(&self, key: &str, record: &Value) -> Result<(), StoreError>;

    /// Newest record written under exactly `key`.
    fn get_latest(&self, key: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Every record whose key starts with `prefix`, newest first.
    fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>, StoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteSink
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed [`StorageSink`].
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                key        TEXT NOT NULL,
                written_at TEXT NOT NULL,
                body       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS records_key ON records (key);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StorageSink for SqliteSink {
    fn put(&self, key: &str, record: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        self.conn.lock().execute(
            "INSERT INTO records (key, written_at, body) VALUES (?1, ?2, ?3)",
            params![key, Utc::now().to_rfc3339(), body],
        )?;
        Ok(())
    }

    fn get_latest(&self, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT key, written_at, body FROM records
                 WHERE key = ?1
                 ORDER BY seq DESC
                 LIMIT 1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        row.map(decode_row).transpose()
    }

    fn list(&self, prefix: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, written_at, body FROM records
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY seq DESC",
        )?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(decode_row(row?)?);
        }
        Ok(records)
    }
}

fn decode_row((key, written_at, body): (String, String, String)) -> Result<StoredRecord, StoreError> {
    let written_at = written_at
        .parse::<DateTime<Utc>>()
        .map_err(|e| StoreError::Timestamp {
            key: key.clone(),
            reason: e.to_string(),
        })?;
    Ok(StoredRecord {
        key,
        written_at,
        body: serde_json::from_str(&body)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_latest_on_empty_store_is_none() {
        let sink = SqliteSink::open_in_memory().unwrap();
        assert!(sink.get_latest("missing").unwrap().is_none());
        assert!(sink.list("").unwrap().is_empty());
    }

    #[test]
    fn puts_append_and_latest_wins() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.put("a", &json!(1)).unwrap();
        sink.put("a", &json!(2)).unwrap();
        sink.put("b", &json!(3)).unwrap();
        assert_eq!(sink.get_latest("a").unwrap().unwrap().body, json!(2));
        assert_eq!(sink.list("a").unwrap().len(), 2);
    }

    #[test]
    fn list_filters_by_prefix_newest_first() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.put("object/keys/1", &json!("old")).unwrap();
        sink.put("anchor/home/1", &json!("anchor")).unwrap();
        sink.put("object/wallet/2", &json!("new")).unwrap();

        let objects = sink.list("object/").unwrap();
        let keys: Vec<&str> = objects.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["object/wallet/2", "object/keys/1"]);
    }

    #[test]
    fn prefix_with_like_wildcards_is_literal() {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.put("object/a_b/1", &json!(1)).unwrap();
        sink.put("object/axb/1", &json!(2)).unwrap();
        assert_eq!(sink.list("object/a_b/").unwrap().len(), 1);
    }

    #[test]
    fn file_backed_sink_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wayfind.db");
        {
            let sink = SqliteSink::open(&path).unwrap();
            sink.put("object/keys/1", &json!({"name": "keys"})).unwrap();
        }
        let sink = SqliteSink::open(&path).unwrap();
        let rec = sink.get_latest("object/keys/1").unwrap().unwrap();
        assert_eq!(rec.body["name"], "keys");
    }

    #[test]
    fn store_error_maps_to_nav_error() {
        let err: NavError = StoreError::Json(serde_json::from_str::<Value>("{").unwrap_err()).into();
        assert!(matches!(err, NavError::Storage(_)));
    }
}
