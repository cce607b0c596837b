//! Idempotency cache.
//!
//! Generalizes the rate limiter's sharded `HashMap` guarded by
//! `parking_lot::Mutex` from "requests per IP within a window" to
//! "`eventKey` seen within a TTL". Every handler checks this before doing
//! anything else; a hit short-circuits to a no-op success.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::IdempotencyConfig;
use crate::events::EventKey;

const SHARD_COUNT: usize = 16;

struct Shard {
    entries: Mutex<HashMap<String, Instant>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

/// Thread-safe map keyed by `eventKey`, sharded to keep per-handler
/// contention low. A lazy sweep runs whenever a shard crosses
/// `sweep_trigger` entries, removing anything older than the TTL; it
/// never blocks a handler beyond that shard's own lock.
pub struct IdempotencyCache {
    shards: Vec<Shard>,
    ttl: Duration,
    sweep_trigger: usize,
}

impl IdempotencyCache {
    pub fn new(config: &IdempotencyConfig) -> Arc<Self> {
        let shards = (0..SHARD_COUNT).map(|_| Shard::new()).collect();
        Arc::new(Self {
            shards,
            ttl: config.ttl(),
            sweep_trigger: config.sweep_trigger,
        })
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hash: u64 = 1469598103934665603;
        for b in key.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        &self.shards[(hash as usize) % self.shards.len()]
    }

    /// Returns `true` if `key` has already been seen within the TTL (the
    /// caller should treat this as a duplicate and skip processing).
    /// Otherwise records `key` as seen now and returns `false`.
    pub fn check_and_record(&self, key: &EventKey) -> bool {
        let key = key.to_string();
        let shard = self.shard_for(&key);
        let now = Instant::now();
        let mut entries = shard.entries.lock();

        if let Some(seen_at) = entries.get(&key) {
            if now.duration_since(*seen_at) < self.ttl {
                return true;
            }
        }

        entries.insert(key, now);
        if entries.len() > self.sweep_trigger {
            let ttl = self.ttl;
            entries.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
        }
        false
    }

    /// Peek without recording: whether `key` is already present and still
    /// within its TTL. Used by the partition worker's pre-handler check
    /// (step 3 of the per-record lifecycle); the post-success insert is a
    /// separate `check_and_record` call so a handler that fails never
    /// marks its event as seen.
    pub fn contains(&self, key: &EventKey) -> bool {
        let key = key.to_string();
        let shard = self.shard_for(&key);
        let now = Instant::now();
        let entries = shard.entries.lock();
        matches!(entries.get(&key), Some(seen_at) if now.duration_since(*seen_at) < self.ttl)
    }

    /// Total entries currently held across all shards, for metrics.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.entries.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn key(id: &str) -> EventKey {
        EventKey {
            entity_id: id.to_string(),
            event_type: "REQUEST_COMPLETED".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn first_seen_is_not_a_duplicate() {
        let cache = IdempotencyCache::new(&IdempotencyConfig::default());
        assert!(!cache.check_and_record(&key("e1")));
    }

    #[test]
    fn replay_within_ttl_is_a_duplicate() {
        let cache = IdempotencyCache::new(&IdempotencyConfig::default());
        let k = key("e1");
        assert!(!cache.check_and_record(&k));
        assert!(cache.check_and_record(&k));
    }

    #[test]
    fn replay_past_ttl_is_not_a_duplicate() {
        let config = IdempotencyConfig {
            ttl_hours: 0,
            sweep_trigger: 1000,
        };
        let cache = IdempotencyCache::new(&config);
        let k = key("e1");
        assert!(!cache.check_and_record(&k));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.check_and_record(&k));
    }

    #[test]
    fn sweep_triggers_past_size_threshold() {
        let config = IdempotencyConfig {
            ttl_hours: 0,
            sweep_trigger: 4,
        };
        let cache = IdempotencyCache::new(&config);
        for i in 0..4 {
            cache.check_and_record(&key(&format!("same-shard-{i}")));
        }
        std::thread::sleep(Duration::from_millis(5));
        cache.check_and_record(&key("trigger-sweep"));
        assert!(cache.len() <= 5);
    }

    #[test]
    fn contains_does_not_record() {
        let cache = IdempotencyCache::new(&IdempotencyConfig::default());
        let k = key("e1");
        assert!(!cache.contains(&k));
        assert!(!cache.contains(&k));
        assert!(!cache.check_and_record(&k));
        assert!(cache.contains(&k));
    }

    #[test]
    fn distinct_event_types_for_same_entity_are_distinct_keys() {
        let cache = IdempotencyCache::new(&IdempotencyConfig::default());
        let ts = Utc::now();
        let a = EventKey {
            entity_id: "e1".into(),
            event_type: "REQUEST_STARTED".into(),
            timestamp: ts,
        };
        let b = EventKey {
            entity_id: "e1".into(),
            event_type: "REQUEST_COMPLETED".into(),
            timestamp: ts,
        };
        assert!(!cache.check_and_record(&a));
        assert!(!cache.check_and_record(&b));
    }
}
