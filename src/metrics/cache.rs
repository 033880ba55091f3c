//! Identity-keyed TTL cache for computed payloads.

use crate::metrics::payload::AggregatePayload;
use core::fmt::Debug;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const LOG_TARGET: &str = "     cache";

/// Source of the current instant, injectable so tests control expiry.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Instant;
}

/// The process clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct CacheEntry {
    payload: Arc<AggregatePayload>,
    expires_at: Instant,
}

/// In-memory payload cache with a fixed TTL per entry.
///
/// Entries are created or replaced wholesale by successful aggregations and
/// never partially updated; failed aggregations are never cached. There is no
/// eviction beyond replacement, which is acceptable for the expected
/// low-cardinality identity set.
#[derive(Debug)]
pub struct MetricsCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MetricsCache {
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// The still-valid payload for `identity`, if any. Expired entries are
    /// left in place and overwritten by the next successful aggregation.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<Arc<AggregatePayload>> {
        let now = self.clock.now();
        let entries = self.entries.lock().expect("cache lock poisoned");

        entries
            .get(identity)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| Arc::clone(&entry.payload))
    }

    /// Store a fresh payload for `identity`, replacing any previous entry and
    /// restarting its TTL.
    pub fn put(&self, identity: &str, payload: Arc<AggregatePayload>) {
        let expires_at = self.clock.now() + self.ttl;
        log::debug!(target: LOG_TARGET, "caching payload for '{identity}'");

        let mut entries = self.entries.lock().expect("cache lock poisoned");
        _ = entries.insert(identity.to_owned(), CacheEntry { payload, expires_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn starting_now() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    fn payload(total_stars: u64) -> Arc<AggregatePayload> {
        let mut payload = AggregatePayload::default();
        payload.stats.total_stars = total_stars;
        Arc::new(payload)
    }

    #[test]
    fn served_unchanged_before_expiry() {
        let clock = ManualClock::starting_now();
        let cache = MetricsCache::new(Duration::from_secs(600), Arc::<ManualClock>::clone(&clock));

        cache.put("octo", payload(15));
        clock.advance(Duration::from_secs(599));

        let hit = cache.get("octo").expect("entry should still be valid");
        assert_eq!(hit.stats.total_stars, 15);
    }

    #[test]
    fn absent_after_expiry() {
        let clock = ManualClock::starting_now();
        let cache = MetricsCache::new(Duration::from_secs(600), Arc::<ManualClock>::clone(&clock));

        cache.put("octo", payload(15));
        clock.advance(Duration::from_secs(601));

        assert!(cache.get("octo").is_none());
    }

    #[test]
    fn replacement_restarts_the_ttl() {
        let clock = ManualClock::starting_now();
        let cache = MetricsCache::new(Duration::from_secs(600), Arc::<ManualClock>::clone(&clock));

        cache.put("octo", payload(1));
        clock.advance(Duration::from_secs(500));
        cache.put("octo", payload(2));
        clock.advance(Duration::from_secs(500));

        let hit = cache.get("octo").expect("replacement should have restarted the TTL");
        assert_eq!(hit.stats.total_stars, 2);
    }

    #[test]
    fn identities_are_independent() {
        let clock = ManualClock::starting_now();
        let cache = MetricsCache::new(Duration::from_secs(600), Arc::<ManualClock>::clone(&clock));

        cache.put("octo", payload(1));
        assert!(cache.get("other").is_none());
        assert!(cache.get("octo").is_some());
    }
}
