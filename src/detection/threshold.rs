//! Sliding-window threshold tracking for rules that require N matches
//! before firing.
//!
//! Keyed by an arbitrary string; the detection engine uses
//! `rule-id + host`. A single mutex guards the whole map; contention
//! is low and per-key locking buys nothing here.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-key timestamp window counter.
#[derive(Debug, Default)]
pub struct ThresholdTracker {
    counts: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl ThresholdTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a match at the current time. See
    /// [`record_at`](Self::record_at).
    pub fn record(&self, key: &str, threshold: usize, window: Duration) -> bool {
        self.record_at(key, threshold, window, Utc::now())
    }

    /// Record a match at `now`: timestamps older than `now - window`
    /// are dropped, `now` is appended, and the call returns true iff
    /// the surviving count has reached `threshold`. The engine passes
    /// the event's own timestamp so detection stays a pure function of
    /// the event stream.
    pub fn record_at(
        &self,
        key: &str,
        threshold: usize,
        window: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let cutoff = now - window;
        let mut counts = self.counts.lock();
        let stamps = counts.entry(key.to_string()).or_default();
        stamps.retain(|ts| *ts > cutoff);
        stamps.push(now);
        stamps.len() >= threshold
    }

    /// Drop all tracking state for a key. Called immediately after a
    /// rule fires so the next wave must accumulate N matches again.
    pub fn clear(&self, key: &str) {
        self.counts.lock().remove(key);
    }

    /// Number of tracked keys, for the stats endpoint.
    pub fn key_count(&self) -> usize {
        self.counts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn fires_only_at_threshold() {
        let t = ThresholdTracker::new();
        let window = Duration::seconds(60);
        for i in 0..4 {
            assert!(!t.record_at("r1h1", 5, window, at(i * 5)));
        }
        assert!(t.record_at("r1h1", 5, window, at(20)));
    }

    #[test]
    fn old_timestamps_fall_out_of_the_window() {
        let t = ThresholdTracker::new();
        let window = Duration::seconds(60);
        // four matches, then a long gap: the window empties
        for i in 0..4 {
            t.record_at("k", 5, window, at(i));
        }
        assert!(!t.record_at("k", 5, window, at(120)));
        // only the post-gap stamp survives, so four more are needed
        for i in 0..3 {
            assert!(!t.record_at("k", 5, window, at(121 + i)));
        }
        assert!(t.record_at("k", 5, window, at(124)));
    }

    #[test]
    fn clear_resets_the_wave() {
        let t = ThresholdTracker::new();
        let window = Duration::seconds(60);
        for i in 0..5 {
            t.record_at("k", 5, window, at(i));
        }
        t.clear("k");
        assert!(!t.record_at("k", 5, window, at(6)));
        assert_eq!(t.key_count(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let t = ThresholdTracker::new();
        let window = Duration::seconds(60);
        assert!(!t.record_at("a", 2, window, at(0)));
        assert!(!t.record_at("b", 2, window, at(0)));
        assert!(t.record_at("a", 2, window, at(1)));
        assert!(t.record_at("b", 2, window, at(1)));
    }
}
