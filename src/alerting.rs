//! Alert handling: persists every fired alert to the metadata store,
//! logs it, and hands it to the response dispatcher on a detached
//! task so slow actions never stall detection.

use crate::detection::AlertSink;
use crate::error::Result;
use crate::model::Alert;
use crate::response::ResponseDispatcher;
use crate::storage::MetaStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// The default alert sink wired into detection and deception.
pub struct AlertManager {
    store: Arc<MetaStore>,
    response: Option<Arc<ResponseDispatcher>>,
}

impl AlertManager {
    /// New manager; `response` may be absent (alerts persist only).
    pub fn new(store: Arc<MetaStore>, response: Option<Arc<ResponseDispatcher>>) -> Arc<Self> {
        Arc::new(Self { store, response })
    }
}

#[async_trait]
impl AlertSink for AlertManager {
    async fn handle(&self, alert: Alert) -> Result<()> {
        self.store.insert_alert(&alert)?;
        warn!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            severity = %alert.severity,
            host = %alert.host,
            title = %alert.title,
            "ALERT TRIGGERED"
        );

        if let Some(response) = &self.response {
            let response = response.clone();
            let alert = alert.clone();
            tokio::spawn(async move {
                response.execute(&alert).await;
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, Severity};
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn alerts_are_persisted() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let manager = AlertManager::new(store.clone(), None);
        let alert = Alert {
            id: "alt_x_1".into(),
            event_id: "e1".into(),
            rule_id: "r1".into(),
            timestamp: Utc::now(),
            severity: Severity::High,
            title: "suspicious".into(),
            host: "h1".into(),
            summary: String::new(),
            status: AlertStatus::Open,
            assignee: String::new(),
            metadata: BTreeMap::new(),
        };
        manager.handle(alert).await.unwrap();
        assert!(store.get_alert("alt_x_1").unwrap().is_some());
    }
}
