//! Inverted full-text index over events.
//!
//! Each event contributes one row to `docs` (stored keyword fields +
//! timestamp) and one posting per distinct message token. A search is
//! the conjunction of its non-empty predicates and returns event IDs
//! newest-first; payloads live in the raw store.

use crate::error::{Result, SiemError};
use crate::model::{Event, Severity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ToSql};
use std::collections::BTreeSet;
use std::path::Path;

const COMPONENT: &str = "text_index";
const DEFAULT_SEARCH_LIMIT: usize = 200;

/// Search parameters. Every populated predicate must hold; an empty
/// query matches all events up to the default limit.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Full-text terms matched against the message (all must appear)
    pub text: Option<String>,
    /// Exact source filter
    pub source: Option<String>,
    /// Exact host filter
    pub host: Option<String>,
    /// Exact severity filter
    pub severity: Option<Severity>,
    /// Closed lower time bound
    pub start: Option<DateTime<Utc>>,
    /// Open upper time bound
    pub end: Option<DateTime<Utc>>,
    /// Max results (0 → 200)
    pub limit: usize,
}

/// The index itself; its own database file, separate from the raw
/// store and the metadata store.
pub struct TextIndex {
    conn: Mutex<Connection>,
}

impl TextIndex {
    /// Open (or create) the index at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| SiemError::io(COMPONENT, e))?;
        }
        let conn = Connection::open(path).map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Self::init(conn)
    }

    /// In-memory index for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            CREATE TABLE IF NOT EXISTS docs (
                id       TEXT PRIMARY KEY,
                source   TEXT NOT NULL,
                host     TEXT NOT NULL,
                user     TEXT NOT NULL,
                severity TEXT NOT NULL,
                category TEXT NOT NULL,
                ts       INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_docs_ts       ON docs(ts);
            CREATE INDEX IF NOT EXISTS idx_docs_source   ON docs(source);
            CREATE INDEX IF NOT EXISTS idx_docs_host     ON docs(host);
            CREATE INDEX IF NOT EXISTS idx_docs_severity ON docs(severity);
            CREATE TABLE IF NOT EXISTS postings (
                term   TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                PRIMARY KEY (term, doc_id)
            ) WITHOUT ROWID;
            CREATE INDEX IF NOT EXISTS idx_postings_doc ON postings(doc_id);
            "#,
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Index (or re-index) one event. Re-indexing the same ID replaces
    /// the document and its postings.
    pub fn index_event(&self, ev: &Event) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Self::upsert(&tx, ev)?;
        tx.commit().map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Index a batch in one commit.
    pub fn index_batch(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        for ev in events {
            Self::upsert(&tx, ev)?;
        }
        tx.commit().map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    fn upsert(tx: &rusqlite::Transaction<'_>, ev: &Event) -> Result<()> {
        tx.execute(
            "DELETE FROM postings WHERE doc_id = ?1",
            params![ev.id],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        tx.execute(
            "INSERT OR REPLACE INTO docs (id, source, host, user, severity, category, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ev.id,
                ev.source,
                ev.host,
                ev.user,
                ev.severity.as_str(),
                ev.category,
                ev.timestamp_nanos(),
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let mut stmt = tx
            .prepare_cached("INSERT OR IGNORE INTO postings (term, doc_id) VALUES (?1, ?2)")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        for term in tokenize(&ev.message) {
            stmt.execute(params![term, ev.id])
                .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        }
        Ok(())
    }

    /// Run a search; returns matching event IDs sorted by descending
    /// timestamp, up to the query limit.
    pub fn search(&self, q: &SearchQuery) -> Result<Vec<String>> {
        let limit = if q.limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            q.limit
        };

        let mut sql = String::from("SELECT d.id FROM docs d WHERE 1=1");
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(text) = q.text.as_deref() {
            for term in tokenize(text) {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM postings p WHERE p.term = ? AND p.doc_id = d.id)",
                );
                args.push(Box::new(term));
            }
        }
        if let Some(source) = q.source.as_deref() {
            sql.push_str(" AND d.source = ?");
            args.push(Box::new(source.to_string()));
        }
        if let Some(host) = q.host.as_deref() {
            sql.push_str(" AND d.host = ?");
            args.push(Box::new(host.to_string()));
        }
        if let Some(sev) = q.severity {
            sql.push_str(" AND d.severity = ?");
            args.push(Box::new(sev.as_str()));
        }
        if let Some(start) = q.start {
            sql.push_str(" AND d.ts >= ?");
            args.push(Box::new(start.timestamp_nanos_opt().unwrap_or(i64::MIN)));
        }
        if let Some(end) = q.end {
            sql.push_str(" AND d.ts < ?");
            args.push(Box::new(end.timestamp_nanos_opt().unwrap_or(i64::MAX)));
        }
        sql.push_str(" ORDER BY d.ts DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Remove a document and its postings.
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM postings WHERE doc_id = ?1", params![id])
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        conn.execute("DELETE FROM docs WHERE id = ?1", params![id])
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM docs", [], |row| row.get(0))
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Commit pending writes; the connection closes on drop.
    pub fn close(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }
}

/// Lower-cased alphanumeric tokens, deduplicated. Single characters
/// are kept so port numbers and drive letters stay searchable.
fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
