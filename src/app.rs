//! Composition root.
//!
//! Opens storage, wires every subsystem through constructor injection
//! (no back-reference cycles: each component takes only the narrow
//! collaborators it calls), starts the listeners and background loops,
//! and owns the single cancellation signal. Shutdown is serialised:
//! listeners stop accepting, the pipeline drains and flushes, the
//! sealer seals its pending batch, storage closes last.

use crate::alerting::AlertManager;
use crate::config::Config;
use crate::deception::DeceptionMatcher;
use crate::detection::{seed::seed_default_rules, DetectionEngine};
use crate::enrichment::{AssetEnricher, EnrichmentPipeline, GeoIpEnricher, ThreatIntelEnricher};
use crate::error::{Result, SiemError};
use crate::fim::FileIntegrityMonitor;
use crate::forensics::{self, ForensicSealer};
use crate::model::Event;
use crate::monitoring::{self, Monitor};
use crate::netflow::NetflowCollector;
use crate::pipeline::hec::{HecState, TokenValidator};
use crate::pipeline::{hec, syslog, tail, IngestionPipeline, Processor};
use crate::response::{NotifyAction, ResponseDispatcher};
use crate::storage::{retention, MetaStore, StorageEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEDUP_REAP_INTERVAL: Duration = Duration::from_secs(300);
const RAW_GC_INTERVAL: Duration = Duration::from_secs(300);

impl TokenValidator for MetaStore {
    fn validate(&self, token: &str) -> bool {
        self.token_is_valid(token)
    }
}

/// The assembled server.
pub struct App {
    storage: Arc<StorageEngine>,
    pipeline: Arc<IngestionPipeline>,
    detection: Arc<DetectionEngine>,
    deception: Arc<DeceptionMatcher>,
    sealer: Arc<ForensicSealer>,
    threat_intel: Arc<ThreatIntelEnricher>,
    netflow: Arc<NetflowCollector>,
    monitor: Arc<Monitor>,
    fim: Option<Arc<FileIntegrityMonitor>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Bring the whole system up. Storage or listener-bind failures
    /// abort startup; optional subsystems (FIM, rule seeding) degrade
    /// to warnings.
    pub async fn start(config: Config) -> Result<App> {
        config.validate()?;
        let storage = Arc::new(StorageEngine::open(&config.storage.base_dir)?);
        let meta = storage.meta();

        // Response actions and the alert sink they hang off.
        let response = ResponseDispatcher::new(meta.clone());
        response.register(Arc::new(NotifyAction::new(config.notifications.clone())));
        let alerts = AlertManager::new(meta.clone(), Some(response));

        // Detection: seed the built-in catalogue, then load.
        let detection = Arc::new(DetectionEngine::new(alerts.clone()));
        if let Err(e) = seed_default_rules(&meta) {
            warn!(error = %e, "rule seeding failed");
        }
        if let Err(e) = detection.load_rules(&meta) {
            warn!(error = %e, "detection engine failed to load rules");
        }

        // Enrichment chain, in the order rules depend on.
        let threat_intel = Arc::new(ThreatIntelEnricher::new());
        let enrichment = Arc::new(
            EnrichmentPipeline::new()
                .add(Arc::new(GeoIpEnricher::new()))
                .add(threat_intel.clone())
                .add(Arc::new(AssetEnricher::new(meta.clone()))),
        );

        // Deception.
        let deception = Arc::new(DeceptionMatcher::new(alerts.clone()));
        if let Err(e) = deception.reload(&meta) {
            warn!(error = %e, "deception matcher failed to load tokens");
        }

        // Forensics: key material, then the sealer.
        let keys = match forensics::load_or_generate(&config.storage.base_dir.join("keys")) {
            Ok(keys) => {
                info!(public_key = %keys.public_key_hex(), "block signing key ready");
                Some(keys)
            }
            Err(e) => {
                warn!(error = %e, "signing key unavailable, blocks will be unsigned");
                None
            }
        };
        let sealer = Arc::new(ForensicSealer::new(
            meta.clone(),
            config.forensics.block_size,
            keys,
        )?);

        let monitor = Monitor::new();

        // The pipeline. Processor order is load-bearing: enrichment
        // must precede detection so rules can match on enriched
        // metadata; the sealer sees the finalised event after both.
        let processors: Vec<Arc<dyn Processor>> = vec![
            enrichment,
            deception.clone(),
            detection.clone(),
            sealer.clone(),
            monitor.clone(),
        ];
        let pipeline = IngestionPipeline::start(
            config.ingestion.queue_capacity,
            config.ingestion.batch_size,
            Duration::from_secs(config.ingestion.flush_interval_secs.max(1)),
            storage.clone(),
            processors,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Listeners. A configured port that cannot be bound is fatal.
        let (udp, tcp) = syslog::bind(config.ingestion.syslog_port)
            .await
            .map_err(|e| SiemError::io("syslog", e))?;
        tasks.push(tokio::spawn(syslog::serve_udp(
            udp,
            pipeline.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(syslog::serve_tcp(
            tcp,
            pipeline.clone(),
            shutdown_rx.clone(),
        )));

        let hec_listener = hec::bind(config.ingestion.hec_port)
            .await
            .map_err(|e| SiemError::io("hec", e))?;
        let hec_state = HecState::new(
            pipeline.clone(),
            config.ingestion.hec_token.clone(),
            Some(meta.clone() as Arc<dyn TokenValidator>),
        );
        tasks.push(tokio::spawn(hec::serve(
            hec_listener,
            hec_state,
            shutdown_rx.clone(),
        )));

        let netflow = NetflowCollector::new(pipeline.clone());
        let netflow_socket = NetflowCollector::bind(config.ingestion.netflow_port)
            .await
            .map_err(|e| SiemError::io("netflow", e))?;
        tasks.push(tokio::spawn(
            netflow.clone().serve(netflow_socket, shutdown_rx.clone()),
        ));

        for path in &config.ingestion.tail_files {
            tasks.push(tokio::spawn(tail::tail_file(
                path.clone(),
                pipeline.clone(),
                shutdown_rx.clone(),
            )));
        }

        // File-integrity monitoring; failure here degrades, it does
        // not abort the server.
        let fim = match FileIntegrityMonitor::new(meta.clone(), pipeline.clone()) {
            Ok((fim, rx)) => {
                match meta.list_fim_watchlist() {
                    Ok(paths) => {
                        for path in paths {
                            if let Err(e) = fim.add_path(std::path::Path::new(&path)) {
                                warn!(path, error = %e, "could not watch path");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "could not load FIM watchlist"),
                }
                tasks.push(tokio::spawn(fim.clone().run(rx, shutdown_rx.clone())));
                Some(fim)
            }
            Err(e) => {
                warn!(error = %e, "file integrity monitor unavailable");
                None
            }
        };

        // Background loops: retention, sealing tick, dedup reaper,
        // throughput reporting.
        tasks.push(tokio::spawn(retention::run(
            storage.clone(),
            config.storage.retention_days,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(forensics::run_sealer_ticker(
            sealer.clone(),
            Duration::from_secs(config.forensics.sealing_period_secs.max(1)),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(reap_dedup_loop(
            detection.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(raw_gc_loop(
            storage.clone(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(monitoring::report_loop(
            monitor.clone(),
            pipeline.clone(),
            shutdown_rx.clone(),
        )));

        info!("server started");
        Ok(App {
            storage,
            pipeline,
            detection,
            deception,
            sealer,
            threat_intel,
            netflow,
            monitor,
            fim,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Submit an event from an in-process producer (agents facade,
    /// tests). Same bounded-queue semantics as the listeners.
    pub fn ingest(&self, ev: Event) {
        self.pipeline.ingest(ev);
    }

    /// Shared storage facade.
    pub fn storage(&self) -> Arc<StorageEngine> {
        self.storage.clone()
    }

    /// The detection engine (rule reloads, acknowledgements).
    pub fn detection(&self) -> Arc<DetectionEngine> {
        self.detection.clone()
    }

    /// The deception matcher (reload after token CRUD).
    pub fn deception(&self) -> Arc<DeceptionMatcher> {
        self.deception.clone()
    }

    /// The forensic sealer (verification, evidence capture).
    pub fn sealer(&self) -> Arc<ForensicSealer> {
        self.sealer.clone()
    }

    /// The threat-intel indicator set.
    pub fn threat_intel(&self) -> Arc<ThreatIntelEnricher> {
        self.threat_intel.clone()
    }

    /// The netflow collector (stats, top talkers).
    pub fn netflow(&self) -> Arc<NetflowCollector> {
        self.netflow.clone()
    }

    /// The file-integrity monitor, when available.
    pub fn fim(&self) -> Option<Arc<FileIntegrityMonitor>> {
        self.fim.clone()
    }

    /// Events processed since startup.
    pub fn events_processed(&self) -> u64 {
        self.monitor.processed()
    }

    /// Graceful shutdown: cancel everything, join the background
    /// tasks, drain the pipeline, seal the pending forensic batch,
    /// close storage.
    pub async fn shutdown(self) {
        info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "background task panicked");
            }
        }

        self.pipeline.stop().await;
        self.sealer.seal_pending();
        if let Err(e) = self.storage.close() {
            error!(error = %e, "storage close reported errors");
        }
        info!("shutdown complete");
    }
}

async fn reap_dedup_loop(detection: Arc<DetectionEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(DEDUP_REAP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => detection.reap_dedup(),
        }
    }
}

async fn raw_gc_loop(storage: Arc<StorageEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(RAW_GC_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                if let Err(e) = storage.run_gc() {
                    warn!(error = %e, "raw store gc failed");
                }
            }
        }
    }
}
