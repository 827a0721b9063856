//! Bounded ingestion pipeline.
//!
//! Producers (listeners, agents, FIM, netflow) enqueue events with a
//! non-blocking try-send; when the queue is full the event is dropped
//! and counted. That is the system's backpressure policy: it protects
//! detection latency instead of guaranteeing zero loss, and it must
//! never be turned into a blocking send.
//!
//! A single consumer drains the queue, runs the processor chain in
//! strict registration order (enrichment must precede detection), and
//! flushes accumulated events to storage in batches of 100 or on a
//! one-second tick, whichever comes first.

pub mod hec;
pub mod syslog;
pub mod tail;

use crate::model::Event;
use crate::storage::StorageEngine;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A component that consumes events from the pipeline, in order.
/// Processors mutate the event in place (enrichment, severity
/// escalation) and absorb their own errors.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Stable name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Handle one event. Runs on the single consumer task; the event
    /// is exclusively owned for the duration of the call.
    async fn process(&self, event: &mut Event);
}

/// Handle to the running pipeline: producers ingest through it, the
/// composition root stops it.
pub struct IngestionPipeline {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionPipeline {
    /// Spawn the consumer and return the producer-facing handle.
    pub fn start(
        queue_capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
        storage: Arc<StorageEngine>,
        processors: Vec<Arc<dyn Processor>>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let names: Vec<&str> = processors.iter().map(|p| p.name()).collect();
        info!(capacity = queue_capacity, processors = ?names, "ingestion pipeline starting");

        let worker = tokio::spawn(consume(
            rx,
            shutdown_rx,
            storage,
            processors,
            batch_size,
            flush_interval,
        ));
        Arc::new(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Submit an event. Never blocks: a full queue drops the event and
    /// increments the drop counter.
    pub fn ingest(&self, ev: Event) {
        match self.tx.try_send(ev) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(event_id = %ev.id, dropped_total = n, "ingestion queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(ev)) => {
                warn!(event_id = %ev.id, "ingestion pipeline stopped, dropping event");
            }
        }
    }

    /// Events dropped at the queue boundary since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the consumer: signal shutdown, then wait for it to drain
    /// the queue and flush the partial batch.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "pipeline worker panicked");
            }
        }
        info!("ingestion pipeline stopped");
    }
}

async fn consume(
    mut rx: mpsc::Receiver<Event>,
    mut shutdown_rx: watch::Receiver<bool>,
    storage: Arc<StorageEngine>,
    processors: Vec<Arc<dyn Processor>>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch: Vec<Event> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                // Drain whatever is already queued, then flush.
                while let Ok(mut ev) = rx.try_recv() {
                    for p in &processors {
                        p.process(&mut ev).await;
                    }
                    batch.push(ev);
                    if batch.len() >= batch_size {
                        flush(&storage, &mut batch);
                    }
                }
                flush(&storage, &mut batch);
                return;
            }
            maybe_ev = rx.recv() => {
                match maybe_ev {
                    Some(mut ev) => {
                        for p in &processors {
                            p.process(&mut ev).await;
                        }
                        batch.push(ev);
                        if batch.len() >= batch_size {
                            flush(&storage, &mut batch);
                        }
                    }
                    None => {
                        flush(&storage, &mut batch);
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&storage, &mut batch);
                }
            }
        }
    }
}

/// Write the batch and reset it. A failed flush is logged and the
/// batch dropped; the next flush proceeds normally.
fn flush(storage: &StorageEngine, batch: &mut Vec<Event>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = storage.write_event_batch(batch) {
        error!(batch = batch.len(), error = %e, "failed to flush event batch");
    }
    batch.clear();
}
