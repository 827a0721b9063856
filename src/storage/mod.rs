//! Unified storage coordinator.
//!
//! Wires together three engines, each its own database file under the
//! base directory:
//!   - `events/raw.db`: time-ordered raw event payloads
//!   - `index/search.db`: inverted full-text index
//!   - `sqlite/palisade.db`: relational metadata
//!
//! Callers use this facade; the engines are implementation detail. The
//! paired-write contract: an event lands in the raw store first, then
//! the index. An index failure leaves the payload retained and is
//! reported, so the paired-write invariant holds on clean shutdown.

pub mod meta_store;
pub mod raw_store;
pub mod retention;
pub mod text_index;

pub use meta_store::MetaStore;
pub use raw_store::{RawStore, RawStoreStats};
pub use text_index::{SearchQuery, TextIndex};

use crate::error::{Result, SiemError};
use crate::model::Event;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Purge batch size: IDs are collected in bounded slices so a large
/// backlog cannot exhaust memory.
const PURGE_BATCH: usize = 10_000;

/// Combined size metrics for the dashboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageStats {
    /// Raw store bytes on disk
    pub raw_disk_bytes: u64,
    /// Events in the raw store
    pub raw_event_count: u64,
    /// Documents in the full-text index
    pub indexed_docs: u64,
}

/// Top-level storage engine: raw store + index + metadata.
pub struct StorageEngine {
    raw: RawStore,
    index: TextIndex,
    meta: Arc<MetaStore>,
}

impl StorageEngine {
    /// Open all three engines under `base_dir`, creating directories
    /// as needed. Any engine failing to open is a startup failure.
    pub fn open(base_dir: &Path) -> Result<Self> {
        let raw = RawStore::open(&base_dir.join("events").join("raw.db"))?;
        let index = TextIndex::open(&base_dir.join("index").join("search.db"))?;
        let meta = Arc::new(MetaStore::open(&base_dir.join("sqlite").join("palisade.db"))?);
        info!(base_dir = %base_dir.display(), "storage engines open");
        Ok(Self { raw, index, meta })
    }

    /// All-in-memory engine for tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            raw: RawStore::open_in_memory()?,
            index: TextIndex::open_in_memory()?,
            meta: Arc::new(MetaStore::open_in_memory()?),
        })
    }

    /// The metadata store, shared with detection, deception, forensics
    /// and the response dispatcher.
    pub fn meta(&self) -> Arc<MetaStore> {
        self.meta.clone()
    }

    /// Write one event to the raw store, then the index. A raw-store
    /// failure aborts before indexing; an index failure is reported
    /// but the payload stays retained for best-effort re-indexing.
    pub fn write_event(&self, ev: &Event) -> Result<()> {
        self.raw.put(ev)?;
        self.index.index_event(ev)
    }

    /// Batched form of [`write_event`](Self::write_event); both sides
    /// commit their half in a single transaction.
    pub fn write_event_batch(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.raw.put_batch(events)?;
        self.index.index_batch(events)
    }

    /// Search the index for IDs, then resolve payloads from the raw
    /// store. IDs whose payload is gone (a race with retention) are
    /// dropped silently. Results are newest-first, matching the
    /// index's ordering.
    pub fn search(&self, q: &SearchQuery) -> Result<Vec<Event>> {
        let ids = self.index.search(q)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut events = self.raw.get_many(&ids)?;
        // get_many returns raw-store scan order (oldest first);
        // restore the index's descending-timestamp contract
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }

    /// Fetch one event by ID from the raw store.
    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        self.raw.get(id)
    }

    /// Fetch multiple events by ID in one read transaction; missing
    /// IDs are silently skipped.
    pub fn get_events(&self, ids: &[String]) -> Result<Vec<Event>> {
        self.raw.get_many(ids)
    }

    /// Delete everything older than `cutoff` from the index and the
    /// raw store. Returns the number of raw events removed. IDs are
    /// collected in bounded slices; each slice's index docs are
    /// removed before its raw keys, so a crash mid-purge leaves only
    /// already-unindexed payloads behind.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut total = 0;
        loop {
            let batch =
                self.raw
                    .query_time_range(DateTime::<Utc>::UNIX_EPOCH, cutoff, PURGE_BATCH)?;
            if batch.is_empty() {
                break;
            }
            for ev in &batch {
                if let Err(e) = self.index.delete(&ev.id) {
                    warn!(event_id = %ev.id, error = %e, "index delete failed during purge");
                }
            }
            let last_batch = batch.len() < PURGE_BATCH;
            let boundary = if last_batch {
                cutoff
            } else {
                // Resume just past this slice on the next pass; never
                // beyond the cutoff.
                match batch.last() {
                    Some(ev) => (ev.timestamp + chrono::Duration::nanoseconds(1)).min(cutoff),
                    None => cutoff,
                }
            };
            total += self.raw.delete_older_than(boundary)?;
            if last_batch {
                break;
            }
        }
        Ok(total)
    }

    /// Reclaim dead pages in the raw store.
    pub fn run_gc(&self) -> Result<()> {
        self.raw.run_gc()
    }

    /// Combined size metrics.
    pub fn stats(&self) -> Result<StorageStats> {
        let raw = self.raw.stats()?;
        Ok(StorageStats {
            raw_disk_bytes: raw.disk_bytes,
            raw_event_count: raw.event_count,
            indexed_docs: self.index.doc_count()?,
        })
    }

    /// Shut down in order (index commits pending, then raw store,
    /// then metadata), collecting every error instead of stopping at the
    /// first.
    pub fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.index.close() {
            errors.push(format!("index: {e}"));
        }
        if let Err(e) = self.raw.close() {
            errors.push(format!("raw: {e}"));
        }
        if let Err(e) = self.meta.close() {
            errors.push(format!("meta: {e}"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SiemError::Shutdown {
                component: "storage",
                details: errors.join("; "),
            })
        }
    }
}
