//! Event enrichment: an ordered chain of enrichers that annotate an
//! event's metadata (and may escalate its severity) before detection
//! runs. A failing enricher is logged and skipped; the rest of the
//! chain still executes.

pub mod asset;
pub mod geoip;
pub mod threat_intel;

pub use asset::AssetEnricher;
pub use geoip::GeoIpEnricher;
pub use threat_intel::ThreatIntelEnricher;

use crate::error::Result;
use crate::model::Event;
use crate::pipeline::Processor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// One enrichment step.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// Annotate the event in place.
    async fn enrich(&self, ev: &mut Event) -> Result<()>;
}

/// The ordered chain. Built once at startup; registration order is
/// execution order.
pub struct EnrichmentPipeline {
    enrichers: Vec<Arc<dyn Enricher>>,
}

impl EnrichmentPipeline {
    /// Empty chain.
    pub fn new() -> Self {
        Self {
            enrichers: Vec::new(),
        }
    }

    /// Append an enricher to the chain.
    pub fn add(mut self, enricher: Arc<dyn Enricher>) -> Self {
        debug!(enricher = enricher.name(), "enricher registered");
        self.enrichers.push(enricher);
        self
    }

    /// Number of registered enrichers.
    pub fn len(&self) -> usize {
        self.enrichers.len()
    }

    /// True when no enrichers are registered.
    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }
}

impl Default for EnrichmentPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for EnrichmentPipeline {
    fn name(&self) -> &'static str {
        "enrichment"
    }

    async fn process(&self, event: &mut Event) {
        for enricher in &self.enrichers {
            if let Err(e) = enricher.enrich(event).await {
                warn!(
                    enricher = enricher.name(),
                    event_id = %event.id,
                    error = %e,
                    "enricher failed"
                );
            }
        }
    }
}
