//! Deception matcher: scans every event for honeytoken values.
//!
//! Tokens live in the metadata store; the matcher keeps a lower-cased
//! copy in memory and is explicitly reloaded after any token CRUD. A
//! hit anywhere in the event's user, host, message, or string-valued
//! fields fires one CRITICAL alert and stops scanning that event.

use crate::detection::AlertSink;
use crate::error::Result;
use crate::model::{Alert, AlertStatus, Event, Honeytoken, Severity};
use crate::pipeline::Processor;
use crate::storage::MetaStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Honeytoken containment scanner.
pub struct DeceptionMatcher {
    /// lower-cased token value → token
    tokens: RwLock<HashMap<String, Honeytoken>>,
    sink: Arc<dyn AlertSink>,
}

impl DeceptionMatcher {
    /// New matcher with an empty token set.
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Replace the in-memory token set from the store. Call after any
    /// honeytoken create or delete.
    pub fn reload(&self, store: &MetaStore) -> Result<usize> {
        let tokens = store.list_honeytokens()?;
        let mut map = HashMap::with_capacity(tokens.len());
        for t in tokens {
            map.insert(t.value.to_lowercase(), t);
        }
        let count = map.len();
        *self.tokens.write() = map;
        info!(tokens = count, "honeytoken set loaded");
        Ok(count)
    }

    /// Number of loaded tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }

    /// The first token whose value is contained (case-insensitively)
    /// in any scanned field, with the field's name.
    fn find_hit(&self, ev: &Event) -> Option<(Honeytoken, String)> {
        let tokens = self.tokens.read();
        if tokens.is_empty() {
            return None;
        }

        let mut candidates: Vec<(&str, String)> = vec![
            ("user", ev.user.to_lowercase()),
            ("host", ev.host.to_lowercase()),
            ("message", ev.message.to_lowercase()),
        ];
        for (name, value) in &ev.fields {
            if let Some(s) = value.as_str() {
                candidates.push((name.as_str(), s.to_lowercase()));
            }
        }

        for (field, haystack) in &candidates {
            if haystack.is_empty() {
                continue;
            }
            for (needle, token) in tokens.iter() {
                if haystack.contains(needle.as_str()) {
                    return Some((token.clone(), field.to_string()));
                }
            }
        }
        None
    }

    fn build_alert(&self, ev: &Event, token: &Honeytoken, field: &str) -> Alert {
        Alert {
            id: format!("dec_{}_{}", token.id, ev.timestamp_nanos()),
            event_id: ev.id.clone(),
            rule_id: format!("DECEPTION_{}", token.kind.as_str()),
            timestamp: ev.timestamp,
            severity: Severity::Critical,
            title: format!("Deception Triggered: {}", token.kind.as_str()),
            host: ev.host.clone(),
            summary: format!(
                "Honeytoken '{}' ({}) accessed in field '{}'",
                token.value, token.description, field
            ),
            status: AlertStatus::Open,
            assignee: String::new(),
            metadata: Default::default(),
        }
    }
}

#[async_trait]
impl Processor for DeceptionMatcher {
    fn name(&self) -> &'static str {
        "deception"
    }

    async fn process(&self, event: &mut Event) {
        // find_hit drops the read guard before the sink await
        if let Some((token, field)) = self.find_hit(event) {
            let alert = self.build_alert(event, &token, &field);
            if let Err(e) = self.sink.handle(alert).await {
                warn!(token = %token.id, error = %e, "deception alert sink failed");
            }
        }
    }
}
