//! Append-only raw event store.
//!
//! Events are serialised to JSON and keyed as
//! `evt:{unix-nano-15-digits}:{id}` in a single-column-keyed table, so
//! lexicographic order equals chronological order and every time-range
//! query is a B-tree prefix seek. The store is its own database file;
//! the full-text index and metadata store never share its write path.

use crate::error::{Result, SiemError};
use crate::model::Event;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

const COMPONENT: &str = "raw_store";
const EVT_PREFIX: &str = "evt:";

/// On-disk size metrics for the dashboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStoreStats {
    /// Bytes used by live pages
    pub disk_bytes: u64,
    /// Number of stored events
    pub event_count: u64,
}

/// Time-ordered key-value store of raw event payloads.
pub struct RawStore {
    conn: Mutex<Connection>,
}

impl RawStore {
    /// Open (or create) the store at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| SiemError::io(COMPONENT, e))?;
        }
        let conn = Connection::open(path).map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA auto_vacuum = INCREMENTAL;
            PRAGMA busy_timeout = 5000;
            CREATE TABLE IF NOT EXISTS events (
                key     TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            ) WITHOUT ROWID;
            "#,
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Write a single event. Durable on return.
    pub fn put(&self, ev: &Event) -> Result<()> {
        let payload = serde_json::to_string(ev).map_err(|e| SiemError::serde(COMPONENT, e))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO events (key, payload) VALUES (?1, ?2)",
            params![event_key(&ev.timestamp, &ev.id), payload],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// Write a batch in one transaction: after a crash either all of
    /// the batch is visible or none of it.
    pub fn put_batch(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        {
            let mut stmt = tx
                .prepare_cached("INSERT OR REPLACE INTO events (key, payload) VALUES (?1, ?2)")
                .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
            for ev in events {
                let payload =
                    serde_json::to_string(ev).map_err(|e| SiemError::serde(COMPONENT, e))?;
                stmt.execute(params![event_key(&ev.timestamp, &ev.id), payload])
                    .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
            }
        }
        tx.commit().map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Fetch one event by ID. The key embeds the timestamp before the
    /// ID, so this scans for the segment after the second colon.
    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM events
                 WHERE substr(key, instr(substr(key, 5), ':') + 5) = ?1 LIMIT 1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        match payload {
            Some(p) => Ok(Some(
                serde_json::from_str(&p).map_err(|e| SiemError::serde(COMPONENT, e))?,
            )),
            None => Ok(None),
        }
    }

    /// Fetch multiple events in one read transaction, returned in key
    /// (chronological) order. Missing IDs are silently skipped, as are
    /// rows whose payload no longer parses.
    pub fn get_many(&self, ids: &[String]) -> Result<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let placeholders = vec!["?"; wanted.len()].join(",");
        let sql = format!(
            "SELECT payload FROM events
             WHERE substr(key, instr(substr(key, 5), ':') + 5) IN ({placeholders})
             ORDER BY key"
        );
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map(params_from_iter(wanted.iter()), |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;

        let mut results = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| SiemError::sqlite(COMPONENT, e))?;
            match serde_json::from_str(&payload) {
                Ok(ev) => results.push(ev),
                Err(e) => debug!(error = %e, "skipping undecodable event payload"),
            }
        }
        Ok(results)
    }

    /// Events in `[start, end)`, oldest first, up to `limit`
    /// (0 → 500).
    pub fn query_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let limit = if limit == 0 { 500 } else { limit };
        let start_key = event_key(&start, "");
        let end_key = event_key(&end, "");
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT payload FROM events WHERE key >= ?1 AND key < ?2 ORDER BY key LIMIT ?3",
            )
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map(params![start_key, end_key, limit as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;

        let mut results = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| SiemError::sqlite(COMPONENT, e))?;
            match serde_json::from_str(&payload) {
                Ok(ev) => results.push(ev),
                Err(e) => debug!(error = %e, "skipping undecodable event payload"),
            }
        }
        Ok(results)
    }

    /// Delete all events timestamped before `cutoff`; returns the
    /// number of keys removed. The deletion streams through the B-tree
    /// rather than collecting keys in memory first.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_key = event_key(&cutoff, "");
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM events WHERE key < ?1",
                params![cutoff_key],
            )
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(deleted)
    }

    /// Reclaim value space freed by deletions. Runs in small steps so
    /// readers are never blocked for long.
    pub fn run_gc(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA incremental_vacuum(256);")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// On-disk size metrics.
    pub fn stats(&self) -> Result<RawStoreStats> {
        let conn = self.conn.lock();
        let page_count: u64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let page_size: u64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let event_count: u64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(RawStoreStats {
            disk_bytes: page_count * page_size,
            event_count,
        })
    }

    /// Flush the WAL so a clean shutdown leaves a single consistent
    /// file. The connection itself closes on drop.
    pub fn close(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }
}

/// Lexicographically time-ordered key: `evt:{nanos:015}:{id}`.
fn event_key(ts: &DateTime<Utc>, id: &str) -> String {
    let nanos = ts.timestamp_nanos_opt().unwrap_or(i64::MAX);
    format!("{EVT_PREFIX}{nanos:015}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(id: &str, secs: i64) -> Event {
        let mut ev = Event::new("test", "h1", format!("message {id}"));
        ev.id = id.to_string();
        ev.timestamp = Utc.timestamp_opt(secs, 0).unwrap();
        ev
    }

    #[test]
    fn key_orders_chronologically() {
        let a = event_key(&Utc.timestamp_opt(100, 0).unwrap(), "z");
        let b = event_key(&Utc.timestamp_opt(200, 0).unwrap(), "a");
        assert!(a < b);
    }

    #[test]
    fn put_and_get_round_trip() {
        let store = RawStore::open_in_memory().unwrap();
        let ev = event_at("e1", 1_700_000_000);
        store.put(&ev).unwrap();
        let got = store.get("e1").unwrap().unwrap();
        assert_eq!(got, ev);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn get_many_returns_subset_in_scan_order() {
        let store = RawStore::open_in_memory().unwrap();
        let events: Vec<Event> = (0..5)
            .map(|i| event_at(&format!("e{i}"), 1_700_000_000 + i))
            .collect();
        store.put_batch(&events).unwrap();

        let ids = vec!["e3".to_string(), "e1".to_string(), "ghost".to_string()];
        let got = store.get_many(&ids).unwrap();
        assert_eq!(got.len(), 2);
        // scan order == chronological order, not request order
        assert_eq!(got[0].id, "e1");
        assert_eq!(got[1].id, "e3");
    }

    #[test]
    fn time_range_is_end_exclusive() {
        let store = RawStore::open_in_memory().unwrap();
        let events: Vec<Event> = (0..10)
            .map(|i| event_at(&format!("e{i}"), 1_700_000_000 + i * 60))
            .collect();
        store.put_batch(&events).unwrap();

        let start = Utc.timestamp_opt(1_700_000_000 + 60, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_000_000 + 240, 0).unwrap();
        let got = store.query_time_range(start, end, 0).unwrap();
        assert_eq!(
            got.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["e1", "e2", "e3"]
        );

        let limited = store.query_time_range(start, end, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn delete_older_than_returns_count() {
        let store = RawStore::open_in_memory().unwrap();
        let events: Vec<Event> = (0..6)
            .map(|i| event_at(&format!("e{i}"), 1_700_000_000 + i * 86_400))
            .collect();
        store.put_batch(&events).unwrap();

        let cutoff = Utc.timestamp_opt(1_700_000_000 + 3 * 86_400, 0).unwrap();
        let deleted = store.delete_older_than(cutoff).unwrap();
        assert_eq!(deleted, 3);
        assert!(store.get("e0").unwrap().is_none());
        assert!(store.get("e3").unwrap().is_some());
    }

    #[test]
    fn batch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.db");
        {
            let store = RawStore::open(&path).unwrap();
            let events: Vec<Event> = (0..3)
                .map(|i| event_at(&format!("e{i}"), 1_700_000_000 + i))
                .collect();
            store.put_batch(&events).unwrap();
            store.close().unwrap();
        }
        let store = RawStore::open(&path).unwrap();
        assert_eq!(store.stats().unwrap().event_count, 3);
        assert!(store.get("e2").unwrap().is_some());
    }
}
