//! Built-in detection rule catalogue, inserted on first run.
//!
//! Conditions are written in the same JSON DSL the matcher parses:
//!
//! ```json
//! { "field": "message", "operator": "contains", "value": "…" }
//! { "logical": "or", "nested": [ … ] }
//! ```
//!
//! Seeding uses INSERT OR IGNORE semantics, so operator edits to a
//! seeded rule survive restarts.

use crate::error::Result;
use crate::model::Severity;
use crate::storage::meta_store::RuleRecord;
use crate::storage::MetaStore;
use chrono::Utc;
use tracing::{info, warn};

struct SeedRule {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    severity: Severity,
    mitre: Option<&'static str>,
    condition: &'static str,
    threshold: i64,
    window_secs: i64,
}

const DEFAULT_RULES: &[SeedRule] = &[
    SeedRule {
        id: "rule-ssh-brute-force",
        name: "SSH Brute Force",
        description: "Five or more failed SSH authentications from one host within a minute.",
        severity: Severity::Critical,
        mitre: Some("T1110"),
        condition: r#"{"logical":"or","nested":[{"field":"message","operator":"contains","value":"Failed password for"},{"field":"message","operator":"contains","value":"Failed publickey for"},{"field":"message","operator":"contains","value":"Invalid user"}]}"#,
        threshold: 5,
        window_secs: 60,
    },
    SeedRule {
        id: "rule-default-account-probe",
        name: "Default Account Probe",
        description: "Authentication attempts against well-known default account names.",
        severity: Severity::High,
        mitre: Some("T1078"),
        condition: r#"{"logical":"or","nested":[{"field":"message","operator":"regex","value":"(?i)Failed password for (admin|administrator|test|guest|user|operator)"},{"field":"message","operator":"regex","value":"(?i)Invalid user (admin|administrator|test|guest|user|operator)"}]}"#,
        threshold: 3,
        window_secs: 120,
    },
    SeedRule {
        id: "rule-audit-log-cleared",
        name: "Audit Log Cleared",
        description: "An audit trail was wiped on a monitored host.",
        severity: Severity::High,
        mitre: Some("T1070"),
        condition: r#"{"logical":"or","nested":[{"field":"message","operator":"regex","value":"EventID.*1102"},{"field":"message","operator":"regex","value":"EventID.*104"},{"field":"message","operator":"contains","value":"audit log was cleared"}]}"#,
        threshold: 1,
        window_secs: 0,
    },
    SeedRule {
        id: "rule-impossible-travel",
        name: "Impossible Travel (heuristic)",
        description: "Heuristic: login mentioning two distant countries in quick succession. Placeholder for real geo-velocity computation.",
        severity: Severity::High,
        mitre: Some("T1078"),
        condition: r#"{"logical":"and","nested":[{"field":"message","operator":"contains","value":"login"},{"field":"message","operator":"regex","value":"(?i)(China|Russia|Brazil|Nigeria|Vietnam|Ukraine)"}]}"#,
        threshold: 2,
        window_secs: 300,
    },
    SeedRule {
        id: "rule-threat-intel-hit",
        name: "Threat Intelligence Match",
        description: "An enricher flagged this event against the indicator set.",
        severity: Severity::High,
        mitre: Some("T1071"),
        condition: r#"{"field":"threat_match","operator":"eq","value":"true"}"#,
        threshold: 1,
        window_secs: 0,
    },
    SeedRule {
        id: "rule-fim-critical-delete",
        name: "Monitored File Deleted",
        description: "A file on the integrity watchlist was removed.",
        severity: Severity::Critical,
        mitre: Some("T1565"),
        condition: r#"{"logical":"and","nested":[{"field":"source","operator":"eq","value":"fim"},{"field":"op","operator":"eq","value":"Deleted"}]}"#,
        threshold: 1,
        window_secs: 0,
    },
    SeedRule {
        id: "rule-suspicious-interpreter",
        name: "Suspicious Interpreter Invocation",
        description: "Encoded or hidden-window interpreter command lines.",
        severity: Severity::High,
        mitre: Some("T1059"),
        condition: r#"{"logical":"or","nested":[{"field":"message","operator":"contains","value":"-EncodedCommand"},{"field":"message","operator":"contains","value":"-WindowStyle Hidden"},{"field":"message","operator":"regex","value":"(?i)base64 -d.*\\| *sh"}]}"#,
        threshold: 1,
        window_secs: 0,
    },
    SeedRule {
        id: "rule-high-entropy-write",
        name: "High-Entropy File Writes",
        description: "Agent-reported writes whose content entropy suggests bulk encryption.",
        severity: Severity::Critical,
        mitre: Some("T1486"),
        condition: r#"{"logical":"and","nested":[{"field":"category","operator":"eq","value":"File Integrity"},{"field":"entropy","operator":"eq","value":"high"}]}"#,
        threshold: 10,
        window_secs: 60,
    },
    SeedRule {
        id: "rule-netflow-exfil-volume",
        name: "Large Outbound Transfer",
        description: "Repeated high-volume flows from an internal host to a public address.",
        severity: Severity::Medium,
        mitre: Some("T1041"),
        condition: r#"{"logical":"and","nested":[{"field":"source","operator":"eq","value":"netflow"},{"field":"direction","operator":"eq","value":"outbound"}]}"#,
        threshold: 50,
        window_secs: 300,
    },
    SeedRule {
        id: "rule-credential-dump-tooling",
        name: "Credential Dump Tooling",
        description: "Process names and arguments associated with credential dumping.",
        severity: Severity::Critical,
        mitre: Some("T1003"),
        condition: r#"{"logical":"or","nested":[{"field":"message","operator":"contains","value":"mimikatz"},{"field":"message","operator":"contains","value":"lsass.exe"},{"field":"message","operator":"contains","value":"/etc/shadow"}]}"#,
        threshold: 1,
        window_secs: 0,
    },
];

/// Populate the rules table with the built-in catalogue. Already
/// present rules (same ID) are left untouched, so this is safe to call
/// on every startup.
pub fn seed_default_rules(store: &MetaStore) -> Result<usize> {
    let existing = store.list_rules(false)?;
    if existing.len() >= DEFAULT_RULES.len() {
        info!(rules = existing.len(), "rule catalogue already seeded");
        return Ok(0);
    }

    let now = Utc::now();
    let mut seeded = 0;
    for r in DEFAULT_RULES {
        let record = RuleRecord {
            id: r.id.to_string(),
            name: r.name.to_string(),
            description: r.description.to_string(),
            severity: r.severity,
            enabled: true,
            mitre: r.mitre.map(str::to_string),
            condition: r.condition.to_string(),
            threshold: r.threshold,
            window_secs: r.window_secs,
            response_action: None,
            response_params: None,
            created_at: now,
            updated_at: now,
        };
        match store.insert_rule(&record) {
            Ok(true) => seeded += 1,
            Ok(false) => {}
            Err(e) => warn!(rule = r.id, error = %e, "failed to seed rule"),
        }
    }
    info!(seeded, "seeded built-in detection rules");
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Condition;

    #[test]
    fn seeding_is_idempotent() {
        let store = MetaStore::open_in_memory().unwrap();
        let first = seed_default_rules(&store).unwrap();
        assert_eq!(first, DEFAULT_RULES.len());
        let second = seed_default_rules(&store).unwrap();
        assert_eq!(second, 0);
        assert_eq!(store.list_rules(true).unwrap().len(), DEFAULT_RULES.len());
    }

    #[test]
    fn every_seeded_condition_parses() {
        for rule in DEFAULT_RULES {
            let parsed: std::result::Result<Condition, _> = serde_json::from_str(rule.condition);
            assert!(parsed.is_ok(), "rule {} has an unparseable condition", rule.id);
        }
    }

    #[test]
    fn thresholds_and_windows_are_sane() {
        for rule in DEFAULT_RULES {
            assert!(rule.threshold >= 1, "rule {}", rule.id);
            assert!(rule.window_secs >= 0, "rule {}", rule.id);
            if rule.threshold > 1 {
                assert!(rule.window_secs > 0, "threshold rule {} needs a window", rule.id);
            }
        }
    }
}
