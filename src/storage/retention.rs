//! Data retention: a background sweep that purges events older than
//! the configured horizon from the raw store and the index, once at
//! startup and then daily. A retention of zero or less disables the
//! loop entirely.

use crate::storage::StorageEngine;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Run the retention loop until the shutdown signal fires. Spawned by
/// the composition root.
pub async fn run(
    storage: Arc<StorageEngine>,
    retention_days: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    if retention_days <= 0 {
        info!("retention disabled");
        return;
    }

    sweep(&storage, retention_days);

    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => sweep(&storage, retention_days),
        }
    }
}

fn sweep(storage: &StorageEngine, retention_days: i64) {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    match storage.purge_older_than(cutoff) {
        Ok(0) => {}
        Ok(n) => info!(purged = n, %cutoff, "retention sweep removed old events"),
        // Partial purge is better than no purge; try again next sweep.
        Err(e) => warn!(error = %e, "retention sweep failed"),
    }
    if let Err(e) = storage.run_gc() {
        warn!(error = %e, "raw store gc failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Event;
    use crate::storage::SearchQuery;
    use chrono::TimeZone;

    #[tokio::test]
    async fn disabled_retention_returns_immediately() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let (_tx, rx) = watch::channel(false);
        // must not hang
        run(storage, 0, rx).await;
    }

    #[test]
    fn sweep_purges_only_expired_events() {
        let storage = StorageEngine::open_in_memory().unwrap();
        let day = 86_400;
        let now = Utc::now().timestamp();
        for (i, age) in [10i64, 9, 8, 1, 0].iter().enumerate() {
            let mut ev = Event::new("syslog", "h1", "line");
            ev.id = format!("e{i}");
            ev.timestamp = Utc.timestamp_opt(now - age * day, 0).unwrap();
            storage.write_event(&ev).unwrap();
        }

        sweep(&storage, 7);

        let left = storage.search(&SearchQuery::default()).unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|e| e.id == "e3" || e.id == "e4"));
    }
}
