//! Core data model: events, alerts, honeytokens, integrity blocks.
//!
//! `Event` is the unit every subsystem agrees on. It is created by a
//! listener or parser, mutated only during the enrichment/detection
//! pass, then frozen and persisted. The maps are `BTreeMap` so the JSON
//! serialisation is byte-deterministic; the forensic Merkle roots
//! depend on that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Importance of an event or alert, ordered `Info < Low < Medium <
/// High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Routine telemetry
    #[default]
    Info,
    /// Noteworthy but expected
    Low,
    /// Should be reviewed
    Medium,
    /// Likely hostile
    High,
    /// Active compromise indicators
    Critical,
}

impl Severity {
    /// Canonical upper-case string form, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Parse the persisted form; unknown strings map to `Info`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dynamic-typed value in an event's parser-specific field bag.
///
/// Modelled as a tagged variant rather than a raw JSON value so the
/// matcher can render values as text today without losing numeric
/// ordering for future range operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Str(String),
    /// Nested structure
    Nested(BTreeMap<String, FieldValue>),
    /// Raw bytes (serialised as a number array)
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Text rendering used by the rule matcher and deception scan.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Str(s) => s.clone(),
            FieldValue::Bytes(b) => hex::encode(b),
            FieldValue::Nested(m) => serde_json::to_string(m).unwrap_or_default(),
        }
    }

    /// The string payload, if this value is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<u16> for FieldValue {
    fn from(i: u16) -> Self {
        FieldValue::Int(i64::from(i))
    }
}

/// The core record every log line, flow, and agent report becomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier (uuid v4)
    pub id: String,
    /// Ingest or original event time, nanosecond precision
    pub timestamp: DateTime<Utc>,
    /// Producing subsystem tag ("syslog", "netflow", "fim", …)
    pub source: String,
    /// Originating host (name or IP)
    pub host: String,
    /// Acting user, when known
    #[serde(default)]
    pub user: String,
    /// Importance, may be escalated by enrichers
    pub severity: Severity,
    /// Free-text category
    #[serde(default)]
    pub category: String,
    /// Parsed human-readable message
    pub message: String,
    /// Full raw payload as received
    #[serde(default)]
    pub raw: String,
    /// Parser-specific attributes
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// String metadata written by enrichers and rules
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// New event with a fresh ID, the current time, and `Info` severity.
    pub fn new(
        source: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: source.into(),
            host: host.into(),
            user: String::new(),
            severity: Severity::Info,
            category: String::new(),
            message: message.clone(),
            raw: message,
            fields: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Event timestamp as unix nanoseconds; clamps instead of panicking
    /// on out-of-range dates.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

/// Lifecycle state of an alert. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AlertStatus {
    /// Newly fired, unreviewed
    #[default]
    Open,
    /// An analyst picked it up
    Investigating,
    /// Confirmed and handled
    Resolved,
    /// Ruled benign
    FalsePositive,
    /// Terminal
    Closed,
}

impl AlertStatus {
    /// Persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalsePositive => "false-positive",
            AlertStatus::Closed => "closed",
        }
    }

    /// Parse the persisted form; unknown strings map to `Open`.
    pub fn parse(s: &str) -> Self {
        match s {
            "investigating" => AlertStatus::Investigating,
            "resolved" => AlertStatus::Resolved,
            "false-positive" => AlertStatus::FalsePositive,
            "closed" => AlertStatus::Closed,
            _ => AlertStatus::Open,
        }
    }
}

/// A finding emitted when a detection rule (or honeytoken) fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// `alt_{rule-prefix}_{nanos}` or `dec_{token-id}_{nanos}`
    pub id: String,
    /// The event that triggered the rule
    pub event_id: String,
    /// Triggering rule, or `DECEPTION_{type}` for honeytoken hits
    pub rule_id: String,
    /// Copied from the triggering event
    pub timestamp: DateTime<Utc>,
    /// Copied from the rule
    pub severity: Severity,
    /// Rule name
    pub title: String,
    /// Host the rule fired on
    pub host: String,
    /// One-line description of what fired and where
    pub summary: String,
    /// Lifecycle state
    pub status: AlertStatus,
    /// Assigned analyst, empty until triaged
    #[serde(default)]
    pub assignee: String,
    /// User/source copied from the event plus MITRE fields
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Category of deception trap a honeytoken represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoneytokenKind {
    /// Decoy account name
    User,
    /// Decoy file path
    File,
    /// Decoy link
    Url,
    /// Decoy address
    Ip,
    /// Decoy machine name
    Hostname,
}

impl HoneytokenKind {
    /// Persisted upper-case form; also used in deception rule IDs.
    pub fn as_str(&self) -> &'static str {
        match self {
            HoneytokenKind::User => "USER",
            HoneytokenKind::File => "FILE",
            HoneytokenKind::Url => "URL",
            HoneytokenKind::Ip => "IP",
            HoneytokenKind::Hostname => "HOSTNAME",
        }
    }

    /// Parse the persisted form.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Some(HoneytokenKind::User),
            "FILE" => Some(HoneytokenKind::File),
            "URL" => Some(HoneytokenKind::Url),
            "IP" => Some(HoneytokenKind::Ip),
            "HOSTNAME" => Some(HoneytokenKind::Hostname),
            _ => None,
        }
    }
}

/// A decoy value whose use is always suspicious.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Honeytoken {
    /// Unique identifier
    pub id: String,
    /// Trap category
    pub kind: HoneytokenKind,
    /// The decoy value events are scanned for
    pub value: String,
    /// Operator note
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One sealed, signed, prev-linked record of a batch of events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityBlock {
    /// Auto-increment row id (0 before persistence)
    pub id: i64,
    /// 32-byte Merkle root over the included events
    pub root: Vec<u8>,
    /// The previous block's root; all zeros for genesis
    pub prev: Vec<u8>,
    /// Number of events sealed into the block
    pub event_count: i64,
    /// Seal time
    pub timestamp: DateTime<Utc>,
    /// Ed25519 signature, absent when no key was available at seal time
    pub signature: Option<Vec<u8>>,
}
