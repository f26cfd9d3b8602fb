//! Process-wide event deduplication.
//!
//! Every event source (message dispatch, media ingestion, any future
//! listener) shares one instance so an event id is processed at most once
//! per process lifetime.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

/// Minimum number of event ids the store retains.
pub const DEDUPE_CAPACITY: usize = 10_000;

/// Bounded LRU map of `event_id` to first-seen time.
#[derive(Debug)]
pub struct EventDedupe {
    seen: Mutex<LruCache<String, Instant>>,
}

impl EventDedupe {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEDUPE_CAPACITY)
    }

    /// Create a store with a custom capacity (still at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is nonzero");
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record an event id, returning `true` if it was already present.
    ///
    /// A repeat sighting refreshes the entry's recency but keeps its
    /// original first-seen time.
    pub fn check_and_insert(&self, event_id: &str) -> bool {
        let mut seen = self.seen.lock().expect("dedupe lock poisoned");
        if seen.get(event_id).is_some() {
            true
        } else {
            seen.put(event_id.to_string(), Instant::now());
            false
        }
    }

    /// Whether an event id has been seen, without recording it.
    pub fn contains(&self, event_id: &str) -> bool {
        self.seen
            .lock()
            .expect("dedupe lock poisoned")
            .peek(event_id)
            .is_some()
    }

    /// Number of event ids currently retained.
    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedupe lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventDedupe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_is_not_duplicate() {
        let dedupe = EventDedupe::new();
        assert!(!dedupe.check_and_insert("$event1"));
        assert!(dedupe.check_and_insert("$event1"));
        assert!(!dedupe.check_and_insert("$event2"));
    }

    #[test]
    fn test_contains_does_not_insert() {
        let dedupe = EventDedupe::new();
        assert!(!dedupe.contains("$event1"));
        assert!(!dedupe.check_and_insert("$event1"));
        assert!(dedupe.contains("$event1"));
    }

    #[test]
    fn test_lru_eviction() {
        let dedupe = EventDedupe::with_capacity(2);
        assert!(!dedupe.check_and_insert("$a"));
        assert!(!dedupe.check_and_insert("$b"));
        assert!(!dedupe.check_and_insert("$c"));
        // $a was least recently used and is gone; $b and $c remain.
        assert!(!dedupe.contains("$a"));
        assert!(dedupe.contains("$b"));
        assert!(dedupe.contains("$c"));
        assert_eq!(dedupe.len(), 2);
    }

    #[test]
    fn test_repeat_sighting_refreshes_recency() {
        let dedupe = EventDedupe::with_capacity(2);
        dedupe.check_and_insert("$a");
        dedupe.check_and_insert("$b");
        // Touch $a so $b becomes the eviction candidate.
        assert!(dedupe.check_and_insert("$a"));
        dedupe.check_and_insert("$c");
        assert!(dedupe.contains("$a"));
        assert!(!dedupe.contains("$b"));
    }

    #[test]
    fn test_default_capacity() {
        let dedupe = EventDedupe::new();
        for i in 0..DEDUPE_CAPACITY + 100 {
            dedupe.check_and_insert(&format!("$event{i}"));
        }
        assert_eq!(dedupe.len(), DEDUPE_CAPACITY);
    }
}
