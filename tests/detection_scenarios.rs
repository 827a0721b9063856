//! End-to-end detection scenarios: events travel the full pipeline
//! (enrichment, deception, detection) and alerts land in the metadata
//! store through the real alert manager.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use palisade::alerting::AlertManager;
use palisade::deception::DeceptionMatcher;
use palisade::detection::{AlertSink, DetectionEngine};
use palisade::enrichment::{EnrichmentPipeline, GeoIpEnricher, ThreatIntelEnricher};
use palisade::model::{Event, Honeytoken, HoneytokenKind, Severity};
use palisade::pipeline::{IngestionPipeline, Processor};
use palisade::storage::meta_store::RuleRecord;
use palisade::storage::{MetaStore, SearchQuery, StorageEngine};
use std::sync::Arc;
use std::time::Duration;

fn rule(id: &str, condition: &str, severity: Severity, threshold: i64, window: i64) -> RuleRecord {
    RuleRecord {
        id: id.into(),
        name: id.into(),
        description: String::new(),
        severity,
        enabled: true,
        mitre: None,
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

struct Harness {
    storage: Arc<StorageEngine>,
    meta: Arc<MetaStore>,
    pipeline: Arc<IngestionPipeline>,
    threat_intel: Arc<ThreatIntelEnricher>,
}

/// Wire storage, enrichment, deception, and detection the way the
/// composition root does, minus the network listeners.
fn harness(rules: &[RuleRecord], tokens: &[Honeytoken]) -> Harness {
    let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
    let meta = storage.meta();
    for r in rules {
        meta.insert_rule(r).unwrap();
    }
    for t in tokens {
        meta.insert_honeytoken(t).unwrap();
    }

    let alerts = AlertManager::new(meta.clone(), None);
    let detection = Arc::new(DetectionEngine::new(alerts.clone()));
    detection.load_rules(&meta).unwrap();

    let threat_intel = Arc::new(ThreatIntelEnricher::new());
    let enrichment = Arc::new(
        EnrichmentPipeline::new()
            .add(Arc::new(GeoIpEnricher::new()))
            .add(threat_intel.clone()),
    );

    let deception = Arc::new(DeceptionMatcher::new(alerts));
    deception.reload(&meta).unwrap();

    let processors: Vec<Arc<dyn Processor>> = vec![enrichment, deception, detection];
    let pipeline = IngestionPipeline::start(
        10_000,
        100,
        Duration::from_millis(50),
        storage.clone(),
        processors,
    );
    Harness {
        storage,
        meta,
        pipeline,
        threat_intel,
    }
}

#[tokio::test]
async fn brute_force_threshold_fires_on_the_fifth_event() {
    let h = harness(
        &[rule(
            "ssh-brute",
            r#"{"field":"message","operator":"contains","value":"Failed password"}"#,
            Severity::Critical,
            5,
            60,
        )],
        &[],
    );

    for i in 0..4 {
        h.pipeline.ingest(event_at(
            "h1",
            i * 5,
            "Failed password for root from 1.2.3.4",
        ));
    }
    // give the consumer a chance before asserting the negative
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.meta.list_alerts(None, None, 0).unwrap().is_empty());

    h.pipeline.ingest(event_at(
        "h1",
        20,
        "Failed password for root from 1.2.3.4",
    ));
    h.pipeline.stop().await;

    let alerts = h.meta.list_alerts(None, None, 0).unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.rule_id, "ssh-brute");
    assert_eq!(alert.host, "h1");
    assert_eq!(alert.severity, Severity::Critical);
    assert!(alert.summary.contains("ssh-brute"));
    assert!(alert.summary.contains("h1"));

    // all five events were persisted regardless of alerting
    let stored = h.storage.search(&SearchQuery::default()).unwrap();
    assert_eq!(stored.len(), 5);
}

#[tokio::test]
async fn single_shot_rule_suppresses_repeats_until_cooldown_expires() {
    let h = harness(
        &[rule(
            "log-cleared",
            r#"{"field":"message","operator":"contains","value":"audit log was cleared"}"#,
            Severity::High,
            1,
            0,
        )],
        &[],
    );

    for i in 0..3 {
        h.pipeline
            .ingest(event_at("dc-01", i * 30, "The audit log was cleared"));
    }
    // 5 minutes + 1 second after the first hit
    h.pipeline
        .ingest(event_at("dc-01", 301, "The audit log was cleared"));
    h.pipeline.stop().await;

    let alerts = h.meta.list_alerts(None, None, 0).unwrap();
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|a| a.rule_id == "log-cleared"));
    assert!(alerts.iter().all(|a| a.severity == Severity::High));
}

#[tokio::test]
async fn honeytoken_use_fires_a_critical_deception_alert() {
    let h = harness(
        &[],
        &[Honeytoken {
            id: "ht1".into(),
            kind: HoneytokenKind::User,
            value: "admin_honeypot".into(),
            description: "decoy admin account".into(),
            created_at: Utc::now(),
        }],
    );

    let mut ev = event_at("h1", 0, "session opened");
    ev.user = "admin_honeypot".into();
    h.pipeline.ingest(ev);
    h.pipeline.stop().await;

    let alerts = h.meta.list_alerts(None, None, 0).unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].rule_id.starts_with("DECEPTION_USER"));
    assert_eq!(alerts[0].severity, Severity::Critical);
}

#[tokio::test]
async fn threat_intel_hit_escalates_before_detection_sees_the_event() {
    // the rule matches on metadata only the enricher writes, proving
    // enrichment runs before detection
    let h = harness(
        &[rule(
            "intel-hit",
            r#"{"field":"threat_match","operator":"eq","value":"true"}"#,
            Severity::High,
            1,
            0,
        )],
        &[],
    );
    h.threat_intel.add_indicator("1.2.3.4", "Known C2");

    h.pipeline.ingest(event_at("1.2.3.4", 0, "outbound beacon"));
    h.pipeline.stop().await;

    let stored = h.storage.search(&SearchQuery::default()).unwrap();
    assert_eq!(stored.len(), 1);
    let ev = &stored[0];
    assert_eq!(ev.severity, Severity::High);
    assert_eq!(ev.metadata["threat_match"], "true");
    assert_eq!(ev.metadata["threat_reason"], "Known C2");

    let alerts = h.meta.list_alerts(None, None, 0).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "intel-hit");
}

#[tokio::test]
async fn benign_events_produce_zero_alerts() {
    let h = harness(
        &[rule(
            "ssh-brute",
            r#"{"field":"message","operator":"contains","value":"Failed password"}"#,
            Severity::Critical,
            5,
            60,
        )],
        &[Honeytoken {
            id: "ht1".into(),
            kind: HoneytokenKind::User,
            value: "admin_honeypot".into(),
            description: String::new(),
            created_at: Utc::now(),
        }],
    );

    for i in 0..20 {
        h.pipeline
            .ingest(event_at("h1", i, "Accepted publickey for deploy"));
    }
    h.pipeline.stop().await;

    assert!(h.meta.list_alerts(None, None, 0).unwrap().is_empty());
    assert_eq!(h.storage.search(&SearchQuery::default()).unwrap().len(), 20);
}

/// Matcher purity across a realistic sink: identical trees, identical
/// verdicts, regardless of what already fired.
#[tokio::test]
async fn identical_rules_give_identical_verdicts() {
    struct Counting {
        hits: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for Counting {
        async fn handle(&self, _alert: palisade::model::Alert) -> palisade::error::Result<()> {
            self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(())
        }
    }

    let meta = Arc::new(MetaStore::open_in_memory().unwrap());
    let cond = r#"{"field":"message","operator":"regex","value":"Failed password for \\w+"}"#;
    meta.insert_rule(&rule("a", cond, Severity::High, 1, 0)).unwrap();
    meta.insert_rule(&rule("b", cond, Severity::High, 1, 0)).unwrap();

    let sink = Arc::new(Counting {
        hits: std::sync::atomic::AtomicUsize::new(0),
    });
    // zero cooldown so both rules can fire on every event
    let engine = DetectionEngine::with_cooldown(sink.clone(), chrono::Duration::zero());
    engine.load_rules(&meta).unwrap();

    for i in 0..5 {
        engine
            .process_event(&event_at("h1", i, "Failed password for root"))
            .await;
    }
    // both identical rules matched all five events
    assert_eq!(sink.hits.load(std::sync::atomic::Ordering::Relaxed), 10);
}
