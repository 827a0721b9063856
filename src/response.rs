//! Pluggable response actions.
//!
//! An action is a type name plus an `execute` over the alert and its
//! rule-supplied parameters. The dispatcher resolves the triggering
//! rule's configured action, runs it, and records the outcome,
//! success text or error, in the response history table. Deception
//! alerts always route to `notify`. Network side-effect executors
//! (SMTP, chat webhooks, firewall calls) live outside the core; the
//! in-tree `notify` action writes to the structured log.

use crate::config::NotificationConfig;
use crate::error::Result;
use crate::model::Alert;
use crate::storage::meta_store::ResponseRecord;
use crate::storage::MetaStore;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One automated response capability.
#[async_trait]
pub trait ResponseAction: Send + Sync {
    /// Type name rules refer to (`"notify"`, `"block_ip"`, …).
    fn kind(&self) -> &'static str;

    /// Run the action; returns human-readable output on success.
    async fn execute(&self, alert: &Alert, params: &HashMap<String, String>) -> Result<String>;
}

/// Looks up and runs the action configured on the triggering rule.
pub struct ResponseDispatcher {
    store: Arc<MetaStore>,
    actions: RwLock<HashMap<&'static str, Arc<dyn ResponseAction>>>,
}

impl ResponseDispatcher {
    /// New dispatcher with an empty registry.
    pub fn new(store: Arc<MetaStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            actions: RwLock::new(HashMap::new()),
        })
    }

    /// Register an action type.
    pub fn register(&self, action: Arc<dyn ResponseAction>) {
        self.actions.write().insert(action.kind(), action);
    }

    /// Resolve and run the response for an alert, persisting the
    /// outcome. No configured action is a quiet no-op.
    pub async fn execute(&self, alert: &Alert) {
        let (kind, params) = match self.resolve(alert) {
            Some(resolved) => resolved,
            None => return,
        };
        self.execute_action(&kind, alert, &params).await;
    }

    fn resolve(&self, alert: &Alert) -> Option<(String, HashMap<String, String>)> {
        if alert.rule_id.starts_with("DECEPTION_") {
            let mut params = HashMap::new();
            params.insert("message".to_string(), alert.summary.clone());
            return Some(("notify".to_string(), params));
        }

        let rule = match self.store.get_rule(&alert.rule_id) {
            Ok(Some(rule)) => rule,
            Ok(None) => return None,
            Err(e) => {
                warn!(rule_id = %alert.rule_id, error = %e, "rule lookup for response failed");
                return None;
            }
        };
        let kind = rule.response_action?;
        if kind.is_empty() {
            return None;
        }
        let params = rule
            .response_params
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
            .unwrap_or_default();
        Some((kind, params))
    }

    async fn execute_action(&self, kind: &str, alert: &Alert, params: &HashMap<String, String>) {
        let action = self.actions.read().get(kind).cloned();
        let Some(action) = action else {
            warn!(action = kind, "unknown response action type");
            return;
        };
        info!(action = kind, alert_id = %alert.id, "executing response action");

        let mut record = ResponseRecord {
            id: Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            action_kind: kind.to_string(),
            status: "pending".into(),
            output: String::new(),
            timestamp: Utc::now(),
        };
        match action.execute(alert, params).await {
            Ok(output) => {
                record.status = "success".into();
                record.output = output;
            }
            Err(e) => {
                record.status = "failed".into();
                record.output = format!("Error: {e}");
                warn!(action = kind, error = %e, "response action failed");
            }
        }
        if let Err(e) = self.store.insert_response_record(&record) {
            warn!(error = %e, "failed to persist response history");
        }
    }
}

/// Log-only notification. The minimum-severity gate comes through the
/// constructor so tests and deployments never share hidden global
/// state.
pub struct NotifyAction {
    config: NotificationConfig,
}

impl NotifyAction {
    /// New notifier with the given settings.
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ResponseAction for NotifyAction {
    fn kind(&self) -> &'static str {
        "notify"
    }

    async fn execute(&self, alert: &Alert, params: &HashMap<String, String>) -> Result<String> {
        if alert.severity < self.config.min_severity {
            return Ok(format!(
                "suppressed: severity {} below notification floor {}",
                alert.severity, self.config.min_severity
            ));
        }
        let message = params
            .get("message")
            .cloned()
            .unwrap_or_else(|| alert.summary.clone());
        warn!(
            alert_id = %alert.id,
            severity = %alert.severity,
            host = %alert.host,
            %message,
            "ALERT NOTIFICATION"
        );
        Ok(format!("notified: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, Severity};
    use crate::storage::meta_store::RuleRecord;
    use std::collections::BTreeMap;

    struct Echo;

    #[async_trait]
    impl ResponseAction for Echo {
        fn kind(&self) -> &'static str {
            "echo"
        }
        async fn execute(&self, _alert: &Alert, params: &HashMap<String, String>) -> Result<String> {
            Ok(format!("echo {}", params.get("what").cloned().unwrap_or_default()))
        }
    }

    fn alert_for(rule_id: &str, severity: Severity) -> Alert {
        Alert {
            id: format!("alt_{rule_id}_1"),
            event_id: "e1".into(),
            rule_id: rule_id.into(),
            timestamp: Utc::now(),
            severity,
            title: "t".into(),
            host: "h1".into(),
            summary: "Rule 't' triggered on host h1".into(),
            status: AlertStatus::Open,
            assignee: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn rule_with_action(id: &str, action: Option<&str>, params: Option<&str>) -> RuleRecord {
        RuleRecord {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            severity: Severity::High,
            enabled: true,
            mitre: None,
            condition: r#"{"field":"message","operator":"contains","value":"x"}"#.into(),
            threshold: 1,
            window_secs: 0,
            response_action: action.map(str::to_string),
            response_params: params.map(str::to_string),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rule_action_runs_and_history_is_recorded() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        store
            .insert_rule(&rule_with_action(
                "r1",
                Some("echo"),
                Some(r#"{"what":"containment"}"#),
            ))
            .unwrap();
        let dispatcher = ResponseDispatcher::new(store.clone());
        dispatcher.register(Arc::new(Echo));

        let alert = alert_for("r1", Severity::High);
        dispatcher.execute(&alert).await;

        let history = store.list_response_records(&alert.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "success");
        assert_eq!(history[0].output, "echo containment");
        assert_eq!(history[0].action_kind, "echo");
    }

    #[tokio::test]
    async fn rule_without_action_is_a_no_op() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        store.insert_rule(&rule_with_action("r1", None, None)).unwrap();
        let dispatcher = ResponseDispatcher::new(store.clone());
        dispatcher.register(Arc::new(Echo));

        let alert = alert_for("r1", Severity::High);
        dispatcher.execute(&alert).await;
        assert!(store.list_response_records(&alert.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn deception_alerts_route_to_notify() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let dispatcher = ResponseDispatcher::new(store.clone());
        dispatcher.register(Arc::new(NotifyAction::new(NotificationConfig::default())));

        let alert = alert_for("DECEPTION_USER", Severity::Critical);
        dispatcher.execute(&alert).await;

        let history = store.list_response_records(&alert.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action_kind, "notify");
        assert_eq!(history[0].status, "success");
        assert!(history[0].output.starts_with("notified:"));
    }

    #[tokio::test]
    async fn notify_respects_the_severity_floor() {
        let action = NotifyAction::new(NotificationConfig {
            min_severity: Severity::High,
        });
        let low = alert_for("r1", Severity::Low);
        let out = action.execute(&low, &HashMap::new()).await.unwrap();
        assert!(out.starts_with("suppressed"));

        let high = alert_for("r1", Severity::Critical);
        let out = action.execute(&high, &HashMap::new()).await.unwrap();
        assert!(out.starts_with("notified"));
    }

    #[tokio::test]
    async fn unknown_action_kind_records_nothing() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        store
            .insert_rule(&rule_with_action("r1", Some("teleport"), None))
            .unwrap();
        let dispatcher = ResponseDispatcher::new(store.clone());
        let alert = alert_for("r1", Severity::High);
        dispatcher.execute(&alert).await;
        assert!(store.list_response_records(&alert.id).unwrap().is_empty());
    }
}
