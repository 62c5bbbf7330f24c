//! Hash-based change memo with TTL eviction.
//!
//! Answers one question cheaply: did this content actually change since we
//! last saw it? A memo, not a source of truth. Losing every entry only
//! costs redundant downstream work, never correctness.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::hash::fingerprint;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry {
    content: String,
    hash: String,
    cached_at: Instant,
}

/// TTL-bounded memo of the last content seen per key.
pub struct ChangeCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ChangeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Five-minute TTL.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TTL)
    }

    /// Check `new_content` against the memo for `key`.
    ///
    /// Returns `None` when the fingerprint matches the cached one (no-op
    /// signal; the entry is left untouched, so an unchanging key still
    /// expires). Otherwise records the new content and returns it. Expired
    /// entries are swept on every call.
    pub fn check(&self, key: &str, new_content: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.guard();
        entries.retain(|_, entry| now.duration_since(entry.cached_at) < self.ttl);

        let hash = fingerprint(new_content);
        if let Some(entry) = entries.get(key) {
            if entry.hash == hash {
                debug!(key, "Content unchanged, skipping");
                return None;
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                content: new_content.to_string(),
                hash,
                cached_at: now,
            },
        );
        Some(new_content.to_string())
    }

    /// The memoized content for `key`, if present and unexpired.
    pub fn cached(&self, key: &str) -> Option<String> {
        let entries = self.guard();
        entries.get(key).and_then(|entry| {
            (entry.cached_at.elapsed() < self.ttl).then(|| entry.content.clone())
        })
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_reports_change() {
        let cache = ChangeCache::with_defaults();
        assert_eq!(
            cache.check("page:/p/Home", "<h1>Home</h1>"),
            Some("<h1>Home</h1>".to_string())
        );
    }

    #[test]
    fn identical_content_is_a_noop() {
        let cache = ChangeCache::with_defaults();
        cache.check("k", "same");
        assert_eq!(cache.check("k", "same"), None);
        assert_eq!(cache.cached("k").as_deref(), Some("same"));
    }

    #[test]
    fn changed_content_refreshes_entry() {
        let cache = ChangeCache::with_defaults();
        cache.check("k", "v1");
        assert_eq!(cache.check("k", "v2"), Some("v2".to_string()));
        assert_eq!(cache.cached("k").as_deref(), Some("v2"));
    }

    #[test]
    fn hit_does_not_extend_ttl() {
        let ttl = Duration::from_millis(50);
        let cache = ChangeCache::new(ttl);
        cache.check("k", "v");
        std::thread::sleep(Duration::from_millis(30));
        // A hit must not reset the clock.
        assert_eq!(cache.check("k", "v"), None);
        std::thread::sleep(Duration::from_millis(30));
        // Past the original TTL the entry is gone; same content reads as changed.
        assert_eq!(cache.check("k", "v"), Some("v".to_string()));
    }

    #[test]
    fn sweep_evicts_expired_entries() {
        let cache = ChangeCache::new(Duration::from_millis(20));
        cache.check("a", "1");
        cache.check("b", "2");
        assert_eq!(cache.len(), 2);
        std::thread::sleep(Duration::from_millis(30));
        cache.check("c", "3");
        assert_eq!(cache.len(), 1);
        assert!(cache.cached("a").is_none());
    }
}
