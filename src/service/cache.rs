//! Whole-rule-set cache.

use std::time::{Duration, Instant};

use crate::rules::Rule;

/// Snapshot of the full, priority-sorted rule set.
///
/// The TTL bounds staleness; it is not a correctness mechanism. Any
/// successful mutation clears the snapshot outright.
#[derive(Debug)]
pub struct ConfigCache {
    snapshot: Option<Vec<Rule>>,
    fetched_at: Option<Instant>,
    ttl: Duration,
    /// Bumped on every invalidation
    generation: u64,
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            snapshot: None,
            fetched_at: None,
            ttl,
            generation: 0,
        }
    }

    /// Whether the snapshot may be served right now.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }

    /// Whether the snapshot may be served at `now`.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        match (&self.snapshot, self.fetched_at) {
            (Some(_), Some(fetched_at)) => now.saturating_duration_since(fetched_at) < self.ttl,
            _ => false,
        }
    }

    /// The snapshot, if still fresh.
    pub fn get(&self) -> Option<&[Rule]> {
        self.get_at(Instant::now())
    }

    pub fn get_at(&self, now: Instant) -> Option<&[Rule]> {
        if self.is_fresh_at(now) {
            self.snapshot.as_deref()
        } else {
            None
        }
    }

    /// Replace the snapshot, stamped with the current time.
    pub fn store(&mut self, rules: Vec<Rule>) {
        self.store_at(rules, Instant::now());
    }

    pub fn store_at(&mut self, rules: Vec<Rule>, now: Instant) {
        self.snapshot = Some(rules);
        self.fetched_at = Some(now);
    }

    /// Store `rules` only if no invalidation happened since `generation`
    /// was read.
    pub fn store_if_current(&mut self, rules: Vec<Rule>, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.store(rules);
        true
    }

    /// Drop the snapshot.
    pub fn invalidate(&mut self) {
        self.snapshot = None;
        self.fetched_at = None;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_is_stale() {
        let cache = ConfigCache::new(Duration::from_secs(60));
        assert!(!cache.is_fresh());
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_fresh_within_ttl() {
        let mut cache = ConfigCache::new(Duration::from_secs(60));
        let start = Instant::now();
        cache.store_at(Vec::new(), start);

        assert!(cache.is_fresh_at(start + Duration::from_secs(59)));
        assert!(cache.get_at(start + Duration::from_secs(10)).is_some());
        assert!(!cache.is_fresh_at(start + Duration::from_secs(60)));
        assert!(cache.get_at(start + Duration::from_secs(61)).is_none());
    }

    #[test]
    fn test_invalidate_clears_snapshot() {
        let mut cache = ConfigCache::new(Duration::from_secs(60));
        cache.store(Vec::new());
        assert!(cache.is_fresh());

        cache.invalidate();
        assert!(!cache.is_fresh());
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_store_if_current_rejects_stale_loads() {
        let mut cache = ConfigCache::new(Duration::from_secs(60));
        let generation = cache.generation();

        cache.invalidate();
        assert!(!cache.store_if_current(Vec::new(), generation));
        assert!(!cache.is_fresh());

        assert!(cache.store_if_current(Vec::new(), cache.generation()));
        assert!(cache.is_fresh());
    }

    #[test]
    fn test_zero_ttl_never_fresh() {
        let mut cache = ConfigCache::new(Duration::ZERO);
        cache.store(Vec::new());
        assert!(!cache.is_fresh());
    }
}
