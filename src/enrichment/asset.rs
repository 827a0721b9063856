//! Asset enrichment: looks the event's host up in the asset
//! inventory and attaches criticality and ownership context.

use crate::enrichment::Enricher;
use crate::error::Result;
use crate::model::{Event, FieldValue};
use crate::storage::MetaStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Annotates events with `asset_name` / `asset_criticality` /
/// `asset_owner` from the inventory. Lookup misses are not errors.
pub struct AssetEnricher {
    store: Arc<MetaStore>,
}

impl AssetEnricher {
    /// New enricher over the shared metadata store.
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Enricher for AssetEnricher {
    fn name(&self) -> &'static str {
        "asset"
    }

    async fn enrich(&self, ev: &mut Event) -> Result<()> {
        let Ok(Some(asset)) = self.store.get_asset_by_host(&ev.host) else {
            return Ok(());
        };
        ev.metadata.insert("asset_name".into(), asset.hostname);
        ev.metadata
            .insert("asset_criticality".into(), asset.criticality);
        ev.metadata.insert("asset_owner".into(), asset.owner);
        ev.fields
            .insert("asset_id".into(), FieldValue::Str(asset.id));
        Ok(())
    }
}
