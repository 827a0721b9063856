//! Ingestion health counters: a pipeline processor counts processed
//! events, and a background task logs events-per-second alongside the
//! queue's drop counter.

use crate::model::Event;
use crate::pipeline::{IngestionPipeline, Processor};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Snapshot of ingestion health.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorStats {
    /// Events processed since startup
    pub events_total: u64,
    /// Events dropped at the queue boundary
    pub dropped_total: u64,
}

/// Event counter; registered last in the processor chain so it counts
/// fully processed events.
#[derive(Debug, Default)]
pub struct Monitor {
    processed: AtomicU64,
}

impl Monitor {
    /// New counter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Events processed so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Processor for Monitor {
    fn name(&self) -> &'static str {
        "monitoring"
    }

    async fn process(&self, _event: &mut Event) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Log throughput and drop counts periodically until shutdown.
pub async fn report_loop(
    monitor: Arc<Monitor>,
    pipeline: Arc<IngestionPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    let mut last_total = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                let total = monitor.processed();
                let eps = (total - last_total) / REPORT_INTERVAL.as_secs();
                last_total = total;
                info!(
                    eps,
                    events_total = total,
                    dropped_total = pipeline.dropped(),
                    "ingestion stats"
                );
            }
        }
    }
}
