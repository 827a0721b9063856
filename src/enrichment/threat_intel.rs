//! Threat-intelligence enrichment: events whose host or network
//! fields match an indicator are flagged and escalated to High.

use crate::enrichment::Enricher;
use crate::error::Result;
use crate::model::{Event, Severity};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Event fields checked against the indicator set, beyond the host.
const CHECKED_FIELDS: &[&str] = &["src_ip", "dest_ip", "dst_ip", "domain"];

/// In-memory indicator set: indicator value → reason it is listed.
#[derive(Debug, Default)]
pub struct ThreatIntelEnricher {
    indicators: RwLock<HashMap<String, String>>,
}

impl ThreatIntelEnricher {
    /// Empty indicator set.
    pub fn new() -> Self {
        Self::default()
    }

    /// List an indicator (IP, domain, hash) with the reason to flag it.
    pub fn add_indicator(&self, indicator: impl Into<String>, reason: impl Into<String>) {
        self.indicators
            .write()
            .insert(indicator.into(), reason.into());
    }

    /// Remove an indicator.
    pub fn remove_indicator(&self, indicator: &str) {
        self.indicators.write().remove(indicator);
    }

    /// Number of listed indicators.
    pub fn indicator_count(&self) -> usize {
        self.indicators.read().len()
    }

    fn flag(ev: &mut Event, reason: &str) {
        ev.metadata.insert("threat_match".into(), "true".into());
        ev.metadata.insert("threat_reason".into(), reason.into());
        if ev.severity < Severity::High {
            ev.severity = Severity::High;
        }
    }
}

#[async_trait]
impl Enricher for ThreatIntelEnricher {
    fn name(&self) -> &'static str {
        "threat_intel"
    }

    async fn enrich(&self, ev: &mut Event) -> Result<()> {
        let indicators = self.indicators.read();
        if indicators.is_empty() {
            return Ok(());
        }

        if let Some(reason) = indicators.get(&ev.host) {
            let reason = reason.clone();
            drop(indicators);
            Self::flag(ev, &reason);
            return Ok(());
        }

        let mut hit: Option<String> = None;
        for key in CHECKED_FIELDS {
            if let Some(value) = ev.fields.get(*key).and_then(|v| v.as_str()) {
                if let Some(reason) = indicators.get(value) {
                    hit = Some(reason.clone());
                    break;
                }
            }
        }
        drop(indicators);
        if let Some(reason) = hit {
            Self::flag(ev, &reason);
        }
        Ok(())
    }
}
