//! Detection engine: evaluates every ingested event against the
//! loaded rule catalogue, applying threshold and deduplication gates
//! before emitting alerts through the configured sink.

pub mod dedup;
pub mod matcher;
pub mod seed;
pub mod threshold;

pub use dedup::Deduplicator;
pub use matcher::{Condition, Logical, Matcher, Operator};
pub use threshold::ThresholdTracker;

use crate::compliance::ComplianceMap;
use crate::error::Result;
use crate::model::{Alert, AlertStatus, Event, Severity};
use crate::pipeline::Processor;
use crate::storage::MetaStore;
use async_trait::async_trait;
use chrono::Duration;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Default suppression window for single-shot rules: the same rule
/// won't spam alerts for the same host more than once per 5 minutes.
pub const DEFAULT_COOLDOWN_SECS: i64 = 300;

/// Consumer of fired alerts. The engine treats sink errors as
/// non-fatal: they are logged and the remaining rules still run.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Persist and/or dispatch one alert.
    async fn handle(&self, alert: Alert) -> Result<()>;
}

/// A rule compiled for evaluation: condition parsed, bounds clamped.
#[derive(Debug, Clone)]
pub struct ActiveRule {
    /// Rule identifier, used in alert IDs and dedup keys
    pub id: String,
    /// Display name, becomes the alert title
    pub name: String,
    /// Severity copied onto alerts
    pub severity: Severity,
    /// Parsed condition tree
    pub condition: Condition,
    /// Matches required before firing (clamped to >= 1)
    pub threshold: usize,
    /// Sliding window in seconds (clamped to >= 0)
    pub window_secs: i64,
    /// MITRE technique tag, if the rule maps to one
    pub mitre: Option<String>,
}

/// The core detection processing unit.
pub struct DetectionEngine {
    rules: RwLock<Arc<Vec<ActiveRule>>>,
    matcher: Matcher,
    thresholds: ThresholdTracker,
    dedup: Deduplicator,
    sink: Arc<dyn AlertSink>,
    compliance: ComplianceMap,
}

impl DetectionEngine {
    /// New engine with the default 5-minute single-shot cooldown.
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self::with_cooldown(sink, Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }

    /// New engine with an explicit cooldown; zero disables dedup.
    pub fn with_cooldown(sink: Arc<dyn AlertSink>, cooldown: Duration) -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
            matcher: Matcher::new(),
            thresholds: ThresholdTracker::new(),
            dedup: Deduplicator::new(cooldown),
            sink,
            compliance: ComplianceMap::new(),
        }
    }

    /// Load the enabled rule set from the metadata store, replacing
    /// the current snapshot atomically. Rules whose condition fails to
    /// parse are logged and skipped; the rest still load.
    pub fn load_rules(&self, store: &MetaStore) -> Result<usize> {
        let records = store.list_rules(true)?;
        let mut rules = Vec::with_capacity(records.len());
        for r in records {
            let condition: Condition = match serde_json::from_str(&r.condition) {
                Ok(c) => c,
                Err(e) => {
                    warn!(rule_id = %r.id, error = %e, "skipping rule with unparseable condition");
                    continue;
                }
            };
            rules.push(ActiveRule {
                id: r.id,
                name: r.name,
                severity: r.severity,
                condition,
                threshold: r.threshold.max(1) as usize,
                window_secs: r.window_secs.max(0),
                mitre: r.mitre,
            });
        }
        let count = rules.len();
        *self.rules.write() = Arc::new(rules);
        info!(rules = count, "detection rule set loaded");
        Ok(count)
    }

    /// Reload without restarting; same lock as the read side of
    /// [`process_event`](Self::process_event).
    pub fn reload_rules(&self, store: &MetaStore) -> Result<usize> {
        self.load_rules(store)
    }

    /// Number of rules in the active snapshot.
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Expire the dedup cooldown for a rule+host pair (analyst
    /// acknowledgement path).
    pub fn acknowledge(&self, rule_id: &str, host: &str) {
        self.dedup.reset(rule_id, host);
    }

    /// Drop expired dedup entries; driven by the periodic reaper.
    pub fn reap_dedup(&self) {
        self.dedup.gc(chrono::Utc::now());
    }

    /// Evaluate one event against the full rule snapshot, in load
    /// order. Gates per rule: match → threshold (clearing the window
    /// on fire) → dedup for single-shot rules → emit.
    pub async fn process_event(&self, ev: &Event) {
        let rules = self.rules.read().clone();
        for rule in rules.iter() {
            if !self.matcher.matches(ev, &rule.condition) {
                continue;
            }

            // Threshold rules fire once N hits accumulate within the
            // window, then the counter resets so the next wave also
            // requires N hits. They skip dedup: the window itself is
            // the rate limiter.
            if rule.threshold > 1 && rule.window_secs > 0 {
                let key = format!("{}{}", rule.id, ev.host);
                let window = Duration::seconds(rule.window_secs);
                if !self
                    .thresholds
                    .record_at(&key, rule.threshold, window, ev.timestamp)
                {
                    continue;
                }
                self.thresholds.clear(&key);
            } else if !self.dedup.allow_at(&rule.id, &ev.host, ev.timestamp) {
                continue;
            }

            let alert = self.build_alert(rule, ev);
            if let Err(e) = self.sink.handle(alert).await {
                warn!(rule_id = %rule.id, error = %e, "alert sink failed");
            }
        }
    }

    fn build_alert(&self, rule: &ActiveRule, ev: &Event) -> Alert {
        let prefix: String = rule.id.chars().take(8).collect();
        let mut metadata = BTreeMap::new();
        if !ev.user.is_empty() {
            metadata.insert("user".to_string(), ev.user.clone());
        }
        if !ev.source.is_empty() {
            metadata.insert("source".to_string(), ev.source.clone());
        }
        let mut alert = Alert {
            id: format!("alt_{prefix}_{}", ev.timestamp_nanos()),
            event_id: ev.id.clone(),
            rule_id: rule.id.clone(),
            timestamp: ev.timestamp,
            severity: rule.severity,
            title: rule.name.clone(),
            host: ev.host.clone(),
            summary: format!("Rule '{}' triggered on host {}", rule.name, ev.host),
            status: AlertStatus::Open,
            assignee: String::new(),
            metadata,
        };
        if let Some(mitre) = &rule.mitre {
            self.compliance.enrich_alert(&mut alert, mitre);
        }
        alert
    }
}

#[async_trait]
impl Processor for DetectionEngine {
    fn name(&self) -> &'static str {
        "detection"
    }

    async fn process(&self, event: &mut Event) {
        self.process_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::meta_store::RuleRecord;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    /// Sink that records everything it is handed.
    #[derive(Default)]
    pub struct RecordingSink {
        pub alerts: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn handle(&self, alert: Alert) -> Result<()> {
            self.alerts.lock().push(alert);
            Ok(())
        }
    }

    fn rule_record(id: &str, condition: &str, threshold: i64, window: i64) -> RuleRecord {
        RuleRecord {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            severity: Severity::Critical,
            enabled: true,
            mitre: Some("T1110".into()),
            condition: condition.into(),
            threshold,
            window_secs: window,
            response_action: None,
            response_params: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn event_at(host: &str, secs: i64, message: &str) -> Event {
        let mut ev = Event::new("syslog", host, message);
        ev.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        ev
    }

    fn engine_with_rules(rules: &[RuleRecord]) -> (DetectionEngine, Arc<RecordingSink>) {
        let store = MetaStore::open_in_memory().unwrap();
        for r in rules {
            store.insert_rule(r).unwrap();
        }
        let sink = Arc::new(RecordingSink::default());
        let engine = DetectionEngine::new(sink.clone());
        engine.load_rules(&store).unwrap();
        (engine, sink)
    }

    #[tokio::test]
    async fn threshold_rule_fires_on_fifth_match() {
        let cond = r#"{"field":"message","operator":"contains","value":"Failed password"}"#;
        let (engine, sink) = engine_with_rules(&[rule_record("ssh-brute", cond, 5, 60)]);

        for i in 0..4 {
            engine
                .process_event(&event_at("h1", i * 5, "Failed password for root from 1.2.3.4"))
                .await;
        }
        assert!(sink.alerts.lock().is_empty());

        engine
            .process_event(&event_at("h1", 20, "Failed password for root from 1.2.3.4"))
            .await;
        let alerts = sink.alerts.lock();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.rule_id, "ssh-brute");
        assert_eq!(alert.host, "h1");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.summary.contains("ssh-brute"));
        assert!(alert.summary.contains("h1"));
        assert!(alert.id.starts_with("alt_ssh-brut_"));
    }

    #[tokio::test]
    async fn threshold_counts_per_host() {
        let cond = r#"{"field":"message","operator":"contains","value":"Failed password"}"#;
        let (engine, sink) = engine_with_rules(&[rule_record("ssh-brute", cond, 3, 60)]);

        // two hosts, two matches each: no alert anywhere
        for host in ["h1", "h2"] {
            for i in 0..2 {
                engine
                    .process_event(&event_at(host, i, "Failed password"))
                    .await;
            }
        }
        assert!(sink.alerts.lock().is_empty());

        engine.process_event(&event_at("h1", 3, "Failed password")).await;
        assert_eq!(sink.alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn single_shot_rule_dedupes_within_cooldown() {
        let cond = r#"{"field":"message","operator":"contains","value":"audit log was cleared"}"#;
        let (engine, sink) = engine_with_rules(&[rule_record("log-cleared", cond, 1, 0)]);

        for i in 0..3 {
            engine
                .process_event(&event_at("dc-01", i * 30, "The audit log was cleared"))
                .await;
        }
        assert_eq!(sink.alerts.lock().len(), 1);

        // 5 minutes + 1 second after the first alert: fires again
        engine
            .process_event(&event_at("dc-01", 301, "The audit log was cleared"))
            .await;
        assert_eq!(sink.alerts.lock().len(), 2);
    }

    #[tokio::test]
    async fn no_matching_rule_no_alert() {
        let cond = r#"{"field":"message","operator":"contains","value":"Failed password"}"#;
        let (engine, sink) = engine_with_rules(&[rule_record("ssh-brute", cond, 1, 0)]);
        engine
            .process_event(&event_at("h1", 0, "Accepted publickey for deploy"))
            .await;
        assert!(sink.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_rules_are_skipped_not_fatal() {
        let good = rule_record(
            "good",
            r#"{"field":"message","operator":"contains","value":"boom"}"#,
            1,
            0,
        );
        let bad = rule_record("bad", "{this is not json", 1, 0);
        let (engine, sink) = engine_with_rules(&[bad, good]);
        assert_eq!(engine.rule_count(), 1);

        engine.process_event(&event_at("h1", 0, "boom")).await;
        assert_eq!(sink.alerts.lock().len(), 1);
    }

    #[tokio::test]
    async fn mitre_tag_enriches_alert_metadata() {
        let cond = r#"{"field":"message","operator":"contains","value":"Failed password"}"#;
        let (engine, sink) = engine_with_rules(&[rule_record("ssh-brute", cond, 1, 0)]);
        engine
            .process_event(&event_at("h1", 0, "Failed password for root"))
            .await;
        let alerts = sink.alerts.lock();
        assert_eq!(alerts[0].metadata["mitre_technique"], "Brute Force");
        assert_eq!(alerts[0].metadata["source"], "syslog");
    }

    #[tokio::test]
    async fn acknowledge_resets_cooldown() {
        let cond = r#"{"field":"message","operator":"contains","value":"tamper"}"#;
        let (engine, sink) = engine_with_rules(&[rule_record("tamper", cond, 1, 0)]);
        engine.process_event(&event_at("h1", 0, "tamper")).await;
        engine.process_event(&event_at("h1", 10, "tamper")).await;
        assert_eq!(sink.alerts.lock().len(), 1);

        engine.acknowledge("tamper", "h1");
        engine.process_event(&event_at("h1", 20, "tamper")).await;
        assert_eq!(sink.alerts.lock().len(), 2);
    }
}
