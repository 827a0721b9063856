//! Condition trees and their evaluation.
//!
//! A condition is either a leaf predicate over one event field or a
//! logical group of child conditions. Evaluation is a pure function of
//! the event and the tree; the only shared state is the regex compile
//! cache, which stores failures too so a bad pattern is compiled once
//! and then treated as a permanent non-match.

use crate::model::Event;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Comparison applied by a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Exact, case-sensitive equality
    #[serde(rename = "eq", alias = "equals")]
    Equals,
    /// Case-insensitive substring
    Contains,
    /// Cached compiled regular expression
    Regex,
}

/// Connective for a group condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logical {
    /// All children must match
    And,
    /// Any child may match
    Or,
}

/// Recursive rule predicate. Persisted as JSON in the rules table:
///
/// ```json
/// { "field": "message", "operator": "contains", "value": "Failed password" }
/// { "logical": "or", "nested": [ … ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Logical combination of children
    Group {
        /// AND or OR
        logical: Logical,
        /// Child conditions; empty never matches
        nested: Vec<Condition>,
    },
    /// Single-field predicate
    Leaf {
        /// Event field name (canonical attribute, metadata key, or
        /// dynamic field key)
        field: String,
        /// Comparison to apply
        operator: Operator,
        /// Target value
        value: String,
    },
}

/// Stateless condition evaluator with a shared regex cache.
#[derive(Debug, Default)]
pub struct Matcher {
    regex_cache: Mutex<HashMap<String, Option<Regex>>>,
}

impl Matcher {
    /// New matcher with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Does the event satisfy the condition?
    pub fn matches(&self, ev: &Event, cond: &Condition) -> bool {
        match cond {
            Condition::Group { logical, nested } => {
                if nested.is_empty() {
                    return false;
                }
                match logical {
                    Logical::And => nested.iter().all(|c| self.matches(ev, c)),
                    Logical::Or => nested.iter().any(|c| self.matches(ev, c)),
                }
            }
            Condition::Leaf {
                field,
                operator,
                value,
            } => {
                let actual = field_value(ev, field);
                if actual.is_empty() {
                    return false;
                }
                match operator {
                    Operator::Equals => actual == *value,
                    Operator::Contains => {
                        actual.to_lowercase().contains(&value.to_lowercase())
                    }
                    Operator::Regex => match self.compiled(value) {
                        Some(re) => re.is_match(&actual),
                        None => false,
                    },
                }
            }
        }
    }

    fn compiled(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.regex_cache.lock();
        if let Some(entry) = cache.get(pattern) {
            return entry.clone();
        }
        let compiled = match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                debug!(pattern, error = %e, "regex failed to compile; condition will never match");
                None
            }
        };
        cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

/// Resolve a field name against an event: canonical attributes first
/// (by lower-cased name), then the metadata map, then the dynamic
/// fields rendered as text. Absent fields resolve to the empty string.
fn field_value(ev: &Event, field: &str) -> String {
    match field.to_lowercase().as_str() {
        "message" => return ev.message.clone(),
        "host" => return ev.host.clone(),
        "source" => return ev.source.clone(),
        "user" => return ev.user.clone(),
        "severity" => return ev.severity.as_str().to_string(),
        "category" => return ev.category.clone(),
        "raw" => return ev.raw.clone(),
        _ => {}
    }
    if let Some(v) = ev.metadata.get(field) {
        return v.clone();
    }
    if let Some(v) = ev.fields.get(field) {
        return v.render();
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldValue, Severity};

    fn leaf(field: &str, operator: Operator, value: &str) -> Condition {
        Condition::Leaf {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    fn sample_event() -> Event {
        let mut ev = Event::new("syslog", "web-01", "Failed password for root from 1.2.3.4");
        ev.user = "root".into();
        ev.severity = Severity::Medium;
        ev.metadata.insert("threat_match".into(), "true".into());
        ev.fields.insert("src_port".into(), FieldValue::Int(22));
        ev
    }

    #[test]
    fn equals_is_exact_and_case_sensitive() {
        let m = Matcher::new();
        let ev = sample_event();
        assert!(m.matches(&ev, &leaf("user", Operator::Equals, "root")));
        assert!(!m.matches(&ev, &leaf("user", Operator::Equals, "Root")));
        assert!(!m.matches(&ev, &leaf("user", Operator::Equals, "roo")));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let m = Matcher::new();
        let ev = sample_event();
        assert!(m.matches(&ev, &leaf("message", Operator::Contains, "FAILED PASSWORD")));
        assert!(m.matches(&ev, &leaf("message", Operator::Contains, "failed password")));
        assert!(!m.matches(&ev, &leaf("message", Operator::Contains, "accepted")));
    }

    #[test]
    fn regex_matches_and_bad_patterns_never_match() {
        let m = Matcher::new();
        let ev = sample_event();
        assert!(m.matches(
            &ev,
            &leaf("message", Operator::Regex, r"Failed password for \w+ from")
        ));
        // invalid pattern: cached as a miss, evaluated twice without panicking
        let bad = leaf("message", Operator::Regex, r"([unclosed");
        assert!(!m.matches(&ev, &bad));
        assert!(!m.matches(&ev, &bad));
    }

    #[test]
    fn field_resolution_order() {
        let m = Matcher::new();
        let ev = sample_event();
        // canonical attribute by any case
        assert!(m.matches(&ev, &leaf("HOST", Operator::Equals, "web-01")));
        // metadata written by enrichers
        assert!(m.matches(&ev, &leaf("threat_match", Operator::Equals, "true")));
        // dynamic field rendered to text
        assert!(m.matches(&ev, &leaf("src_port", Operator::Equals, "22")));
        // absent field resolves empty, never matches
        assert!(!m.matches(&ev, &leaf("nonexistent", Operator::Contains, "")));
    }

    #[test]
    fn severity_matches_its_canonical_form() {
        let m = Matcher::new();
        let ev = sample_event();
        assert!(m.matches(&ev, &leaf("severity", Operator::Equals, "MEDIUM")));
    }

    #[test]
    fn groups_combine_and_empty_group_never_matches() {
        let m = Matcher::new();
        let ev = sample_event();

        let and_group = Condition::Group {
            logical: Logical::And,
            nested: vec![
                leaf("message", Operator::Contains, "failed"),
                leaf("user", Operator::Equals, "root"),
            ],
        };
        assert!(m.matches(&ev, &and_group));

        let or_group = Condition::Group {
            logical: Logical::Or,
            nested: vec![
                leaf("message", Operator::Contains, "nope"),
                leaf("user", Operator::Equals, "root"),
            ],
        };
        assert!(m.matches(&ev, &or_group));

        let failing_and = Condition::Group {
            logical: Logical::And,
            nested: vec![
                leaf("message", Operator::Contains, "failed"),
                leaf("user", Operator::Equals, "nobody"),
            ],
        };
        assert!(!m.matches(&ev, &failing_and));

        let empty = Condition::Group {
            logical: Logical::Or,
            nested: vec![],
        };
        assert!(!m.matches(&ev, &empty));
    }

    #[test]
    fn matcher_is_pure() {
        let m = Matcher::new();
        let ev = sample_event();
        let cond: Condition = serde_json::from_str(
            r#"{"logical":"or","nested":[
                {"field":"message","operator":"contains","value":"Failed password"},
                {"field":"message","operator":"contains","value":"Invalid user"}]}"#,
        )
        .unwrap();
        let first = m.matches(&ev, &cond);
        for _ in 0..10 {
            assert_eq!(m.matches(&ev, &cond), first);
        }
    }

    #[test]
    fn condition_json_round_trip() {
        let json = r#"{"field":"message","operator":"contains","value":"audit log was cleared"}"#;
        let cond: Condition = serde_json::from_str(json).unwrap();
        assert!(matches!(cond, Condition::Leaf { .. }));

        let json = r#"{"logical":"and","nested":[{"field":"host","operator":"eq","value":"h1"}]}"#;
        let cond: Condition = serde_json::from_str(json).unwrap();
        match cond {
            Condition::Group { logical, nested } => {
                assert_eq!(logical, Logical::And);
                assert_eq!(nested.len(), 1);
            }
            _ => panic!("expected group"),
        }

        // a leaf cannot coexist with nested children in the sum type
        let bad = r#"{"field":"x","operator":"eq","value":"y","logical":"and","nested":[]}"#;
        let parsed: Condition = serde_json::from_str(bad).unwrap();
        assert!(matches!(parsed, Condition::Group { .. }));
    }
}
