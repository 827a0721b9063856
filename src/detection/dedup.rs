//! Alert deduplication: one alert per (rule, host) pair per cooldown
//! window, so a noisy source cannot emit thousands of identical
//! alerts. Threshold rules bypass this; their window already rate
//! limits.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Suppresses repeat alerts for the same (rule, host) within the
/// cooldown. A cooldown of zero disables suppression entirely.
#[derive(Debug)]
pub struct Deduplicator {
    cooldown: Duration,
    last_seen: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl Deduplicator {
    /// New deduplicator with the given cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Should an alert for this rule+host be emitted right now?
    pub fn allow(&self, rule_id: &str, host: &str) -> bool {
        self.allow_at(rule_id, host, Utc::now())
    }

    /// True iff no alert for the pair was allowed within the cooldown
    /// before `now`; a true return also records `now` as last-seen.
    pub fn allow_at(&self, rule_id: &str, host: &str, now: DateTime<Utc>) -> bool {
        if self.cooldown.is_zero() {
            return true;
        }
        let key = (rule_id.to_string(), host.to_string());
        let mut last_seen = self.last_seen.lock();
        if let Some(last) = last_seen.get(&key) {
            if now - *last < self.cooldown {
                return false;
            }
        }
        last_seen.insert(key, now);
        true
    }

    /// Expire the cooldown for a pair immediately, so the next match
    /// fires regardless. Used after analyst acknowledgement.
    pub fn reset(&self, rule_id: &str, host: &str) {
        self.last_seen
            .lock()
            .remove(&(rule_id.to_string(), host.to_string()));
    }

    /// Remove entries whose cooldown has already expired, bounding
    /// memory. Driven by a periodic reaper task.
    pub fn gc(&self, now: DateTime<Utc>) {
        self.last_seen
            .lock()
            .retain(|_, last| now - *last < self.cooldown);
    }

    /// Number of live suppression entries.
    pub fn entry_count(&self) -> usize {
        self.last_seen.lock().len()
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
    fn second_alert_within_cooldown_is_suppressed() {
        let d = Deduplicator::new(Duration::minutes(5));
        assert!(d.allow_at("r1", "h1", at(0)));
        assert!(!d.allow_at("r1", "h1", at(30)));
        assert!(!d.allow_at("r1", "h1", at(299)));
        // 5 minutes + 1 second later the pair may fire again
        assert!(d.allow_at("r1", "h1", at(301)));
    }

    #[test]
    fn pairs_are_independent() {
        let d = Deduplicator::new(Duration::minutes(5));
        assert!(d.allow_at("r1", "h1", at(0)));
        assert!(d.allow_at("r1", "h2", at(1)));
        assert!(d.allow_at("r2", "h1", at(1)));
    }

    #[test]
    fn zero_cooldown_disables_suppression() {
        let d = Deduplicator::new(Duration::zero());
        assert!(d.allow_at("r1", "h1", at(0)));
        assert!(d.allow_at("r1", "h1", at(0)));
    }

    #[test]
    fn reset_forces_next_alert_through() {
        let d = Deduplicator::new(Duration::minutes(5));
        assert!(d.allow_at("r1", "h1", at(0)));
        d.reset("r1", "h1");
        assert!(d.allow_at("r1", "h1", at(1)));
    }

    #[test]
    fn gc_drops_expired_entries_only() {
        let d = Deduplicator::new(Duration::minutes(5));
        d.allow_at("old", "h", at(0));
        d.allow_at("new", "h", at(250));
        d.gc(at(310));
        assert_eq!(d.entry_count(), 1);
        // the surviving entry still suppresses
        assert!(!d.allow_at("new", "h", at(320)));
    }
}
