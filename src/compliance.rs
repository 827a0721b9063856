//! MITRE ATT&CK technique table used to annotate alerts whose rule
//! carries a technique tag.

use crate::model::Alert;
use std::collections::HashMap;

/// A single ATT&CK technique entry.
#[derive(Debug, Clone)]
pub struct Technique {
    /// Technique identifier, e.g. `T1110`
    pub id: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Owning tactic
    pub tactic: &'static str,
}

/// Lookup table mapping technique IDs to names and tactics.
#[derive(Debug)]
pub struct ComplianceMap {
    techniques: HashMap<&'static str, Technique>,
}

const BUILTIN_TECHNIQUES: &[Technique] = &[
    Technique { id: "T1003", name: "OS Credential Dumping", tactic: "Credential Access" },
    Technique { id: "T1021", name: "Remote Services", tactic: "Lateral Movement" },
    Technique { id: "T1041", name: "Exfiltration Over C2 Channel", tactic: "Exfiltration" },
    Technique { id: "T1059", name: "Command and Scripting Interpreter", tactic: "Execution" },
    Technique { id: "T1070", name: "Indicator Removal", tactic: "Defense Evasion" },
    Technique { id: "T1071", name: "Application Layer Protocol", tactic: "Command and Control" },
    Technique { id: "T1078", name: "Valid Accounts", tactic: "Initial Access" },
    Technique { id: "T1110", name: "Brute Force", tactic: "Credential Access" },
    Technique { id: "T1134", name: "Access Token Manipulation", tactic: "Defense Evasion" },
    Technique { id: "T1486", name: "Data Encrypted for Impact", tactic: "Impact" },
    Technique { id: "T1565", name: "Data Manipulation", tactic: "Impact" },
    Technique { id: "T1566", name: "Phishing", tactic: "Initial Access" },
];

impl ComplianceMap {
    /// Build the table from the built-in catalogue.
    pub fn new() -> Self {
        let techniques = BUILTIN_TECHNIQUES
            .iter()
            .map(|t| (t.id, t.clone()))
            .collect();
        Self { techniques }
    }

    /// Look up a technique by ID.
    pub fn technique(&self, id: &str) -> Option<&Technique> {
        self.techniques.get(id)
    }

    /// Inject the `mitre_id` / `mitre_technique` / `mitre_tactic`
    /// triplet into an alert's metadata when the tag is known.
    pub fn enrich_alert(&self, alert: &mut Alert, technique_id: &str) {
        if let Some(t) = self.techniques.get(technique_id) {
            alert.metadata.insert("mitre_id".into(), t.id.into());
            alert.metadata.insert("mitre_technique".into(), t.name.into());
            alert.metadata.insert("mitre_tactic".into(), t.tactic.into());
        }
    }

    /// Tactic → number of covered techniques, for the dashboard.
    pub fn coverage(&self) -> HashMap<&'static str, usize> {
        let mut cov = HashMap::new();
        for t in self.techniques.values() {
            *cov.entry(t.tactic).or_insert(0) += 1;
        }
        cov
    }
}

impl Default for ComplianceMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, Severity};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn empty_alert() -> Alert {
        Alert {
            id: "alt_test_1".into(),
            event_id: "e1".into(),
            rule_id: "r1".into(),
            timestamp: Utc::now(),
            severity: Severity::High,
            title: "test".into(),
            host: "h1".into(),
            summary: String::new(),
            status: AlertStatus::Open,
            assignee: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn known_technique_enriches_alert() {
        let map = ComplianceMap::new();
        let mut alert = empty_alert();
        map.enrich_alert(&mut alert, "T1110");
        assert_eq!(alert.metadata["mitre_technique"], "Brute Force");
        assert_eq!(alert.metadata["mitre_tactic"], "Credential Access");
        assert_eq!(alert.metadata["mitre_id"], "T1110");
    }

    #[test]
    fn unknown_technique_leaves_alert_untouched() {
        let map = ComplianceMap::new();
        let mut alert = empty_alert();
        map.enrich_alert(&mut alert, "T9999");
        assert!(alert.metadata.is_empty());
    }

    #[test]
    fn coverage_counts_by_tactic() {
        let cov = ComplianceMap::new().coverage();
        assert_eq!(cov["Credential Access"], 2);
    }
}
