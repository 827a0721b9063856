//! File tailing: polls a log file every 500 ms, emitting one event
//! per new line. Starts at the end of the file on first open so a
//! restart does not replay history; a shrinking file is treated as
//! truncation and the offset resets to zero.

use crate::model::Event;
use crate::pipeline::IngestionPipeline;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tail `path` into the pipeline until shutdown. Spawned once per
/// configured file.
pub async fn tail_file(
    path: PathBuf,
    pipeline: Arc<IngestionPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(path = %path.display(), "tailing file");
    let mut offset = initial_offset(&path).await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                offset = poll_once(&path, offset, &pipeline).await;
            }
        }
    }
}

async fn initial_offset(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    }
}

/// Read any new content past `offset`; returns the new offset.
async fn poll_once(path: &Path, mut offset: u64, pipeline: &IngestionPipeline) -> u64 {
    let mut file = match File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "tail open failed");
            return offset;
        }
    };
    let len = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(_) => return offset,
    };

    if len < offset {
        // truncated or rotated in place
        offset = 0;
    }
    if len == offset {
        return offset;
    }

    if file.seek(SeekFrom::Start(offset)).await.is_err() {
        return offset;
    }
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let category = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(n) => {
                offset += n as u64;
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if trimmed.is_empty() {
                    continue;
                }
                let mut ev = Event::new("file", "localhost", trimmed);
                ev.category = category.clone();
                pipeline.ingest(ev);
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "tail read failed");
                break;
            }
        }
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SearchQuery, StorageEngine};
    use std::io::Write;

    #[tokio::test]
    async fn new_lines_become_events_and_truncation_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old line\n").unwrap();

        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let pipeline = IngestionPipeline::start(
            64,
            10,
            Duration::from_millis(20),
            storage.clone(),
            vec![],
        );

        // start-at-end: the preexisting line is not replayed
        let mut offset = initial_offset(&path).await;
        offset = poll_once(&path, offset, &pipeline).await;

        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "first new line").unwrap();
            writeln!(f, "second new line").unwrap();
        }
        offset = poll_once(&path, offset, &pipeline).await;

        // truncate, then write fresh content
        std::fs::write(&path, "after truncation\n").unwrap();
        poll_once(&path, offset, &pipeline).await;

        pipeline.stop().await;
        let stored = storage.search(&SearchQuery::default()).unwrap();
        let mut messages: Vec<&str> = stored.iter().map(|e| e.message.as_str()).collect();
        messages.sort();
        assert_eq!(
            messages,
            vec!["after truncation", "first new line", "second new line"]
        );
        assert!(stored.iter().all(|e| e.source == "file"));
        assert!(stored.iter().all(|e| e.category == "app.log"));
    }
}
