//! Alert deduplication.
//!
//! Alertmanager re-sends firing alerts on every group interval; the
//! deduplicator suppresses repeat processing of the same alert instance.
//! The key is `"{fingerprint}:{startsAt}"` so a re-fired alert (new
//! startsAt) is processed again while repeats of the same firing are not.
//!
//! The seen-set is process-local by intent. Check and insert happen under
//! one mutex acquisition, so of two racing callers exactly one proceeds.
//! Eviction only bounds memory; correctness does not depend on it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

const REAPER_INTERVAL_SECS: u64 = 5 * 60;

pub struct AlertDeduplicator {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl AlertDeduplicator {
    /// Create a deduplicator with the given suppression window.
    #[must_use]
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        })
    }

    /// True if this (fingerprint, startsAt) has not been seen within the
    /// TTL; records the sighting as a side effect.
    pub fn should_process(&self, fingerprint: &str, starts_at: DateTime<Utc>) -> bool {
        let key = format!("{}:{}", fingerprint, starts_at.to_rfc3339());
        let now = Utc::now();

        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        if let Some(last_seen) = seen.get(&key) {
            if now - *last_seen < self.ttl {
                return false;
            }
        }
        seen.insert(key, now);
        true
    }

    /// Drop entries older than the TTL.
    pub fn evict_expired(&self) {
        let now = Utc::now();
        let ttl = self.ttl;
        let mut seen = self.seen.lock().expect("dedup lock poisoned");
        let before = seen.len();
        seen.retain(|_, last_seen| now - *last_seen <= ttl);
        let evicted = before - seen.len();
        if evicted > 0 {
            debug!(evicted, remaining = seen.len(), "evicted expired dedup entries");
        }
    }

    /// Spawn the background reaper; runs until the process exits.
    pub fn start_reaper(self: &Arc<Self>) {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(REAPER_INTERVAL_SECS));
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                dedup.evict_expired();
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().expect("dedup lock poisoned").len()
    }
}
