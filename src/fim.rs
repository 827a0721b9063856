//! File-integrity monitoring.
//!
//! Watches a configured path set through the platform notification
//! backend and emits events into the standard ingestion pipeline on
//! content changes. Baseline content hashes are persisted through the
//! metadata store so a restart does not re-trigger "first seen" noise.
//! A write whose content hash is unchanged (metadata-only touch) is
//! ignored.

use crate::error::{Result, SiemError};
use crate::model::{Event, FieldValue, Severity};
use crate::pipeline::IngestionPipeline;
use crate::storage::MetaStore;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const COMPONENT: &str = "fim";

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOp {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl FileOp {
    fn as_str(&self) -> &'static str {
        match self {
            FileOp::Created => "Created",
            FileOp::Modified => "Modified",
            FileOp::Deleted => "Deleted",
            FileOp::Renamed => "Renamed",
        }
    }

    fn severity(&self) -> Severity {
        match self {
            FileOp::Deleted => Severity::Critical,
            _ => Severity::High,
        }
    }
}

/// The integrity monitor. Owns the OS watcher and the baseline map.
pub struct FileIntegrityMonitor {
    watcher: Mutex<RecommendedWatcher>,
    baselines: Mutex<HashMap<PathBuf, String>>,
    store: Arc<MetaStore>,
    pipeline: Arc<IngestionPipeline>,
}

impl FileIntegrityMonitor {
    /// Create the monitor and its event channel. The returned
    /// receiver must be passed to [`run`](Self::run).
    pub fn new(
        store: Arc<MetaStore>,
        pipeline: Arc<IngestionPipeline>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<notify::Event>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            },
        )
        .map_err(|e| SiemError::malformed(COMPONENT, format!("watcher init: {e}")))?;

        Ok((
            Arc::new(Self {
                watcher: Mutex::new(watcher),
                baselines: Mutex::new(HashMap::new()),
                store,
                pipeline,
            }),
            rx,
        ))
    }

    /// Add a path to the watch set, loading its stored baseline hash
    /// first so restarts keep continuity; the current content hash is
    /// computed and persisted only when no baseline exists yet.
    pub fn add_path(&self, path: &Path) -> Result<()> {
        let abs = path
            .canonicalize()
            .map_err(|e| SiemError::io(COMPONENT, e))?;
        let key = abs.to_string_lossy().into_owned();

        let mut baseline = self.store.get_fim_baseline(&key)?.unwrap_or_default();
        if baseline.is_empty() {
            if let Some(hash) = hash_file(&abs) {
                self.store.upsert_fim_baseline(&key, &hash)?;
                baseline = hash;
            }
        }
        let short = &baseline[..baseline.len().min(8)];
        info!(path = %abs.display(), baseline = %short, "watching path");

        self.baselines.lock().insert(abs.clone(), baseline);
        self.watcher
            .lock()
            .watch(&abs, RecursiveMode::NonRecursive)
            .map_err(|e| SiemError::malformed(COMPONENT, format!("watch {}: {e}", abs.display())))
    }

    /// Drain watcher notifications until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<notify::Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                maybe = rx.recv() => {
                    match maybe {
                        Some(event) => self.handle_fs_event(event),
                        None => return,
                    }
                }
            }
        }
    }

    fn handle_fs_event(&self, fs_event: notify::Event) {
        let op = match classify(&fs_event.kind) {
            Some(op) => op,
            None => return,
        };
        for path in &fs_event.paths {
            self.handle_path(op, path);
        }
    }

    fn handle_path(&self, op: FileOp, path: &Path) {
        let key = path.to_string_lossy().into_owned();
        let mut baselines = self.baselines.lock();
        let old_hash = baselines.get(path).cloned().unwrap_or_default();
        let new_hash = hash_file(path).unwrap_or_default();

        match op {
            FileOp::Modified => {
                if !old_hash.is_empty() && old_hash == new_hash {
                    debug!(path = %path.display(), "metadata-only change, ignoring");
                    return;
                }
                baselines.insert(path.to_path_buf(), new_hash.clone());
                if let Err(e) = self.store.upsert_fim_baseline(&key, &new_hash) {
                    warn!(path = %key, error = %e, "baseline persist failed");
                }
            }
            FileOp::Deleted | FileOp::Renamed => {
                baselines.remove(path);
                if let Err(e) = self.store.delete_fim_baseline(&key) {
                    warn!(path = %key, error = %e, "baseline delete failed");
                }
            }
            FileOp::Created => {
                baselines.insert(path.to_path_buf(), new_hash.clone());
                if let Err(e) = self.store.upsert_fim_baseline(&key, &new_hash) {
                    warn!(path = %key, error = %e, "baseline persist failed");
                }
            }
        }
        drop(baselines);

        let mut ev = Event::new(
            "fim",
            "localhost",
            format!("File {}: {}", op.as_str(), path.display()),
        );
        ev.severity = op.severity();
        ev.category = "File Integrity".into();
        ev.fields.insert("path".into(), FieldValue::Str(key));
        ev.fields
            .insert("op".into(), FieldValue::Str(op.as_str().into()));
        ev.fields
            .insert("old_hash".into(), FieldValue::Str(old_hash));
        ev.fields
            .insert("new_hash".into(), FieldValue::Str(new_hash));
        self.pipeline.ingest(ev);
    }
}

fn classify(kind: &EventKind) -> Option<FileOp> {
    match kind {
        EventKind::Create(_) => Some(FileOp::Created),
        EventKind::Remove(_) => Some(FileOp::Deleted),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileOp::Renamed),
        EventKind::Modify(_) => Some(FileOp::Modified),
        _ => None,
    }
}

/// SHA-256 of the file's content; `None` when unreadable (deleted,
/// permission change mid-event).
fn hash_file(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    Some(hex::encode(Sha256::digest(&bytes)))
}
