//! Relational metadata store: alerts, cases, rules, agents, assets,
//! integrity blocks, honeytokens, FIM state, users/tokens, evidence,
//! and the audit log.
//!
//! Writes are serialised through a single connection; the schema is
//! idempotent and applied on open. Timestamps are stored as unix
//! nanoseconds so block signatures verify byte-for-byte after restart.

use crate::error::{Result, SiemError};
use crate::model::{Alert, AlertStatus, Honeytoken, HoneytokenKind, IntegrityBlock, Severity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const COMPONENT: &str = "meta_store";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id          TEXT PRIMARY KEY,
    event_id    TEXT NOT NULL,
    rule_id     TEXT NOT NULL,
    ts          INTEGER NOT NULL,
    severity    TEXT NOT NULL,
    title       TEXT NOT NULL,
    summary     TEXT,
    status      TEXT NOT NULL DEFAULT 'open',
    assignee    TEXT NOT NULL DEFAULT '',
    host        TEXT NOT NULL DEFAULT '',
    metadata    TEXT
);
CREATE INDEX IF NOT EXISTS idx_alerts_ts       ON alerts(ts);
CREATE INDEX IF NOT EXISTS idx_alerts_status   ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);

CREATE TABLE IF NOT EXISTS cases (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    description TEXT,
    severity    TEXT NOT NULL DEFAULT 'MEDIUM',
    status      TEXT NOT NULL DEFAULT 'open',
    assignee    TEXT NOT NULL DEFAULT '',
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status);

CREATE TABLE IF NOT EXISTS case_alerts (
    case_id  TEXT NOT NULL REFERENCES cases(id)  ON DELETE CASCADE,
    alert_id TEXT NOT NULL REFERENCES alerts(id) ON DELETE CASCADE,
    PRIMARY KEY (case_id, alert_id)
);

CREATE TABLE IF NOT EXISTS case_comments (
    id         TEXT PRIMARY KEY,
    case_id    TEXT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
    author     TEXT NOT NULL,
    body       TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_case_comments_case ON case_comments(case_id);

CREATE TABLE IF NOT EXISTS assets (
    id          TEXT PRIMARY KEY,
    hostname    TEXT NOT NULL,
    ip          TEXT NOT NULL DEFAULT '',
    os          TEXT,
    kind        TEXT NOT NULL DEFAULT 'server',
    criticality TEXT NOT NULL DEFAULT 'medium',
    owner       TEXT,
    last_seen   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_assets_hostname ON assets(hostname);

CREATE TABLE IF NOT EXISTS agents (
    id        TEXT PRIMARY KEY,
    hostname  TEXT NOT NULL,
    ip        TEXT NOT NULL DEFAULT '',
    os        TEXT,
    version   TEXT,
    status    TEXT NOT NULL DEFAULT 'offline',
    eps       INTEGER NOT NULL DEFAULT 0,
    last_seen INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agents_hostname ON agents(hostname);

CREATE TABLE IF NOT EXISTS rules (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    description     TEXT,
    severity        TEXT NOT NULL DEFAULT 'MEDIUM',
    enabled         INTEGER NOT NULL DEFAULT 1,
    mitre           TEXT,
    condition       TEXT NOT NULL,
    threshold       INTEGER NOT NULL DEFAULT 1,
    window_secs     INTEGER NOT NULL DEFAULT 60,
    response_action TEXT,
    response_params TEXT,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_enabled ON rules(enabled);

CREATE TABLE IF NOT EXISTS integrity_blocks (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    root_hash   BLOB NOT NULL,
    prev_hash   BLOB NOT NULL,
    event_count INTEGER NOT NULL,
    ts          INTEGER NOT NULL,
    signature   BLOB
);
CREATE INDEX IF NOT EXISTS idx_integrity_ts ON integrity_blocks(ts);

CREATE TABLE IF NOT EXISTS honeytokens (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    value       TEXT NOT NULL,
    description TEXT,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_honeytokens_value ON honeytokens(value);

CREATE TABLE IF NOT EXISTS response_history (
    id          TEXT PRIMARY KEY,
    alert_id    TEXT NOT NULL,
    action_kind TEXT NOT NULL,
    status      TEXT NOT NULL,
    output      TEXT,
    ts          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_response_alert ON response_history(alert_id);

CREATE TABLE IF NOT EXISTS fim_watchlist (
    path        TEXT PRIMARY KEY,
    description TEXT,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS fim_baselines (
    path       TEXT PRIMARY KEY,
    hash       TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    username      TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS roles (
    id   TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS permissions (
    id   TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id       TEXT NOT NULL REFERENCES roles(id)       ON DELETE CASCADE,
    permission_id TEXT NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, role_id)
);

CREATE TABLE IF NOT EXISTS api_tokens (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token      TEXT UNIQUE NOT NULL,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON api_tokens(user_id);

CREATE TABLE IF NOT EXISTS evidence (
    id          TEXT PRIMARY KEY,
    case_id     TEXT NOT NULL,
    event_id    TEXT NOT NULL,
    recorded_by TEXT NOT NULL,
    reason      TEXT,
    raw_hash    TEXT NOT NULL,
    signature   TEXT,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evidence_case ON evidence(case_id);

CREATE TABLE IF NOT EXISTS audit_log (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    action      TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    details     TEXT,
    ts          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_log(ts);

CREATE TABLE IF NOT EXISTS saved_searches (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    query      TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

/// Stored detection rule row.
#[derive(Debug, Clone)]
pub struct RuleRecord {
    /// Rule identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Operator-facing description
    pub description: String,
    /// Severity copied onto alerts
    pub severity: Severity,
    /// Whether detection loads this rule
    pub enabled: bool,
    /// MITRE technique tag, when the rule maps to one
    pub mitre: Option<String>,
    /// Condition tree as JSON
    pub condition: String,
    /// Matches required before firing (>= 1)
    pub threshold: i64,
    /// Sliding window in seconds (>= 0)
    pub window_secs: i64,
    /// Response action type name, if any
    pub response_action: Option<String>,
    /// JSON-encoded string→string parameter map
    pub response_params: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Asset inventory row, used by the asset enricher.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    /// Asset identifier
    pub id: String,
    /// Hostname as events report it
    pub hostname: String,
    /// Primary address
    pub ip: String,
    /// Business criticality label
    pub criticality: String,
    /// Owning team or person
    pub owner: String,
    /// Last time the asset was observed
    pub last_seen: DateTime<Utc>,
}

/// Response-execution outcome row.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    /// Execution identifier
    pub id: String,
    /// Alert that triggered the action
    pub alert_id: String,
    /// Action type name
    pub action_kind: String,
    /// pending / success / failed
    pub status: String,
    /// Success text or error message
    pub output: String,
    /// Execution time
    pub timestamp: DateTime<Utc>,
}

/// Captured-evidence row written by the forensics manager.
#[derive(Debug, Clone)]
pub struct EvidenceRecord {
    /// Evidence identifier
    pub id: String,
    /// Case the evidence belongs to
    pub case_id: String,
    /// Event that was captured
    pub event_id: String,
    /// Analyst who captured it
    pub recorded_by: String,
    /// Why it was captured
    pub reason: String,
    /// SHA-256 of the raw event, hex
    pub raw_hash: String,
    /// Ed25519 signature over the hash, hex; empty when unsigned
    pub signature: String,
    /// Capture time
    pub created_at: DateTime<Utc>,
}

/// Audit-trail row.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Entry identifier
    pub id: String,
    /// Acting user, or `system`
    pub user_id: String,
    /// What happened
    pub action: String,
    /// Kind of object acted on
    pub target_type: String,
    /// Object identifier
    pub target_id: String,
    /// Free-form detail
    pub details: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

/// Single-writer relational store.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    /// Open (or create) the database and apply the schema.
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
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── alerts ──────────────────────────────────────────────────────

    /// Persist an alert.
    pub fn insert_alert(&self, a: &Alert) -> Result<()> {
        let metadata =
            serde_json::to_string(&a.metadata).map_err(|e| SiemError::serde(COMPONENT, e))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO alerts
             (id, event_id, rule_id, ts, severity, title, summary, status, assignee, host, metadata)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                a.id,
                a.event_id,
                a.rule_id,
                nanos(&a.timestamp),
                a.severity.as_str(),
                a.title,
                a.summary,
                a.status.as_str(),
                a.assignee,
                a.host,
                metadata,
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// Fetch one alert by ID.
    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, event_id, rule_id, ts, severity, title, summary, status, assignee, host, metadata
             FROM alerts WHERE id = ?1",
            params![id],
            row_to_alert,
        )
        .optional()
        .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Alerts newest-first with optional status/severity filters.
    pub fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        severity: Option<Severity>,
        limit: usize,
    ) -> Result<Vec<Alert>> {
        let limit = if limit == 0 { 200 } else { limit };
        let mut sql = String::from(
            "SELECT id, event_id, rule_id, ts, severity, title, summary, status, assignee, host, metadata
             FROM alerts WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(s) = status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(s.as_str()));
        }
        if let Some(s) = severity {
            sql.push_str(" AND severity = ?");
            args.push(Box::new(s.as_str()));
        }
        sql.push_str(" ORDER BY ts DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_alert,
            )
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Transition an alert's status (and assignee).
    pub fn update_alert_status(
        &self,
        id: &str,
        status: AlertStatus,
        assignee: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE alerts SET status = ?1, assignee = ?2 WHERE id = ?3",
            params![status.as_str(), assignee, id],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// severity → count of open alerts.
    pub fn alert_counts(&self) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT severity, COUNT(*) FROM alerts WHERE status = 'open' GROUP BY severity")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (sev, n) = row.map_err(|e| SiemError::sqlite(COMPONENT, e))?;
            counts.insert(sev, n);
        }
        Ok(counts)
    }

    // ── rules ───────────────────────────────────────────────────────

    /// Insert a rule; existing IDs are left untouched (seed-safe).
    pub fn insert_rule(&self, r: &RuleRecord) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO rules
                 (id, name, description, severity, enabled, mitre, condition,
                  threshold, window_secs, response_action, response_params, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    r.id,
                    r.name,
                    r.description,
                    r.severity.as_str(),
                    r.enabled as i64,
                    r.mitre,
                    r.condition,
                    r.threshold,
                    r.window_secs,
                    r.response_action,
                    r.response_params,
                    nanos(&r.created_at),
                    nanos(&r.updated_at),
                ],
            )
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(inserted > 0)
    }

    /// Fetch one rule by ID.
    pub fn get_rule(&self, id: &str) -> Result<Option<RuleRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, description, severity, enabled, mitre, condition,
                    threshold, window_secs, response_action, response_params, created_at, updated_at
             FROM rules WHERE id = ?1",
            params![id],
            row_to_rule,
        )
        .optional()
        .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// All rules, optionally restricted to enabled ones, in insert
    /// order (rowid) so detection evaluates them in load order.
    pub fn list_rules(&self, enabled_only: bool) -> Result<Vec<RuleRecord>> {
        let sql = if enabled_only {
            "SELECT id, name, description, severity, enabled, mitre, condition,
                    threshold, window_secs, response_action, response_params, created_at, updated_at
             FROM rules WHERE enabled = 1 ORDER BY rowid"
        } else {
            "SELECT id, name, description, severity, enabled, mitre, condition,
                    threshold, window_secs, response_action, response_params, created_at, updated_at
             FROM rules ORDER BY rowid"
        };
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map([], row_to_rule)
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Enable or disable a rule in place.
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE rules SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled as i64, nanos(&Utc::now()), id],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    // ── integrity blocks ────────────────────────────────────────────

    /// Append a sealed block; returns its assigned row id.
    pub fn insert_block(&self, b: &IntegrityBlock) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO integrity_blocks (root_hash, prev_hash, event_count, ts, signature)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                b.root,
                b.prev,
                b.event_count,
                nanos(&b.timestamp),
                b.signature,
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(conn.last_insert_rowid())
    }

    /// The newest block, if any.
    pub fn last_block(&self) -> Result<Option<IntegrityBlock>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, root_hash, prev_hash, event_count, ts, signature
             FROM integrity_blocks ORDER BY id DESC LIMIT 1",
            [],
            row_to_block,
        )
        .optional()
        .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Blocks in chain order (oldest first), up to `limit` (0 → all).
    pub fn list_blocks(&self, limit: usize) -> Result<Vec<IntegrityBlock>> {
        let limit = if limit == 0 { i64::MAX } else { limit as i64 };
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, root_hash, prev_hash, event_count, ts, signature
                 FROM integrity_blocks ORDER BY id LIMIT ?1",
            )
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map(params![limit], row_to_block)
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    // ── honeytokens ─────────────────────────────────────────────────

    /// Create a honeytoken.
    pub fn insert_honeytoken(&self, t: &Honeytoken) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO honeytokens (id, kind, value, description, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                t.id,
                t.kind.as_str(),
                t.value,
                t.description,
                nanos(&t.created_at),
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// All honeytokens. Rows with an unknown kind are skipped.
    pub fn list_honeytokens(&self) -> Result<Vec<Honeytoken>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, kind, value, description, created_at FROM honeytokens")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let mut tokens = Vec::new();
        for row in rows {
            let (id, kind, value, description, created) =
                row.map_err(|e| SiemError::sqlite(COMPONENT, e))?;
            if let Some(kind) = HoneytokenKind::parse(&kind) {
                tokens.push(Honeytoken {
                    id,
                    kind,
                    value,
                    description: description.unwrap_or_default(),
                    created_at: from_nanos(created),
                });
            }
        }
        Ok(tokens)
    }

    /// Delete a honeytoken by ID.
    pub fn delete_honeytoken(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM honeytokens WHERE id = ?1", params![id])
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    // ── FIM ─────────────────────────────────────────────────────────

    /// Add a path to the watchlist.
    pub fn add_fim_watch(&self, path: &str, description: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO fim_watchlist (path, description, created_at) VALUES (?1,?2,?3)",
            params![path, description, nanos(&Utc::now())],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// All watched paths.
    pub fn list_fim_watchlist(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT path FROM fim_watchlist ORDER BY path")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Store a content hash for a watched path.
    pub fn upsert_fim_baseline(&self, path: &str, hash: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO fim_baselines (path, hash, updated_at) VALUES (?1,?2,?3)",
            params![path, hash, nanos(&Utc::now())],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// Stored content hash for a watched path, if any.
    pub fn get_fim_baseline(&self, path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT hash FROM fim_baselines WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Forget a baseline (file deleted or renamed).
    pub fn delete_fim_baseline(&self, path: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM fim_baselines WHERE path = ?1", params![path])
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    // ── assets ──────────────────────────────────────────────────────

    /// Insert or refresh an asset row.
    pub fn upsert_asset(&self, a: &AssetRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO assets (id, hostname, ip, criticality, owner, last_seen)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                a.id,
                a.hostname,
                a.ip,
                a.criticality,
                a.owner,
                nanos(&a.last_seen),
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// Asset lookup by hostname or IP, used by the asset enricher.
    pub fn get_asset_by_host(&self, host: &str) -> Result<Option<AssetRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, hostname, ip, criticality, owner, last_seen
             FROM assets WHERE hostname = ?1 OR ip = ?1 LIMIT 1",
            params![host],
            |row| {
                Ok(AssetRecord {
                    id: row.get(0)?,
                    hostname: row.get(1)?,
                    ip: row.get(2)?,
                    criticality: row.get(3)?,
                    owner: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    last_seen: from_nanos(row.get(5)?),
                })
            },
        )
        .optional()
        .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    // ── response history / evidence / audit ─────────────────────────

    /// Record the outcome of a response action.
    pub fn insert_response_record(&self, r: &ResponseRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO response_history (id, alert_id, action_kind, status, output, ts)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                r.id,
                r.alert_id,
                r.action_kind,
                r.status,
                r.output,
                nanos(&r.timestamp),
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// Response history for an alert, oldest first.
    pub fn list_response_records(&self, alert_id: &str) -> Result<Vec<ResponseRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, alert_id, action_kind, status, output, ts
                 FROM response_history WHERE alert_id = ?1 ORDER BY ts",
            )
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        let rows = stmt
            .query_map(params![alert_id], |row| {
                Ok(ResponseRecord {
                    id: row.get(0)?,
                    alert_id: row.get(1)?,
                    action_kind: row.get(2)?,
                    status: row.get(3)?,
                    output: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    timestamp: from_nanos(row.get(5)?),
                })
            })
            .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }

    /// Persist a captured-evidence record.
    pub fn insert_evidence(&self, e: &EvidenceRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO evidence
             (id, case_id, event_id, recorded_by, reason, raw_hash, signature, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                e.id,
                e.case_id,
                e.event_id,
                e.recorded_by,
                e.reason,
                e.raw_hash,
                e.signature,
                nanos(&e.created_at),
            ],
        )
        .map_err(|err| SiemError::sqlite(COMPONENT, err))?;
        Ok(())
    }

    /// Append an audit-trail row.
    pub fn insert_audit(&self, a: &AuditRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO audit_log (id, user_id, action, target_type, target_id, details, ts)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                a.id,
                a.user_id,
                a.action,
                a.target_type,
                a.target_id,
                a.details,
                nanos(&a.timestamp),
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    // ── users / api tokens ──────────────────────────────────────────

    /// Create a user row; returns the new user's ID.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?1,?2,?3,?4)",
            params![id, username, password_hash, nanos(&Utc::now())],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(id)
    }

    /// Store an API token for a user.
    pub fn insert_api_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO api_tokens (id, user_id, token, expires_at, created_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                user_id,
                token,
                nanos(&expires_at),
                nanos(&Utc::now()),
            ],
        )
        .map_err(|e| SiemError::sqlite(COMPONENT, e))?;
        Ok(())
    }

    /// True when the token exists and has not expired. Used by the
    /// HTTP collector's bearer-token path.
    pub fn token_is_valid(&self, token: &str) -> bool {
        let conn = self.conn.lock();
        let expires: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM api_tokens WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        match expires {
            Some(exp) => from_nanos(exp) > Utc::now(),
            None => false,
        }
    }

    /// Flush the WAL; the connection closes on drop.
    pub fn close(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| SiemError::sqlite(COMPONENT, e))
    }
}

fn nanos(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn from_nanos(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(n.div_euclid(1_000_000_000), n.rem_euclid(1_000_000_000) as u32)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let metadata: Option<String> = row.get(10)?;
    let metadata: BTreeMap<String, String> = metadata
        .and_then(|m| serde_json::from_str(&m).ok())
        .unwrap_or_default();
    Ok(Alert {
        id: row.get(0)?,
        event_id: row.get(1)?,
        rule_id: row.get(2)?,
        timestamp: from_nanos(row.get(3)?),
        severity: Severity::parse(&row.get::<_, String>(4)?),
        title: row.get(5)?,
        summary: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        status: AlertStatus::parse(&row.get::<_, String>(7)?),
        assignee: row.get(8)?,
        host: row.get(9)?,
        metadata,
    })
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<RuleRecord> {
    Ok(RuleRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        severity: Severity::parse(&row.get::<_, String>(3)?),
        enabled: row.get::<_, i64>(4)? != 0,
        mitre: row.get(5)?,
        condition: row.get(6)?,
        threshold: row.get(7)?,
        window_secs: row.get(8)?,
        response_action: row.get(9)?,
        response_params: row.get(10)?,
        created_at: from_nanos(row.get(11)?),
        updated_at: from_nanos(row.get(12)?),
    })
}

fn row_to_block(row: &Row<'_>) -> rusqlite::Result<IntegrityBlock> {
    Ok(IntegrityBlock {
        id: row.get(0)?,
        root: row.get(1)?,
        prev: row.get(2)?,
        event_count: row.get(3)?,
        timestamp: from_nanos(row.get(4)?),
        signature: row.get(5)?,
    })
}
