//! Advisory lock registry.
//!
//! Locks are plain map entries keyed by string, tagged with an owner. They
//! coordinate cooperating governance operations; nothing enforces them
//! against code that does not ask. Two flavors exist: timed locks taken for
//! the duration of one operation, and indefinite freeze locks that persist
//! until explicitly released.
//!
//! Losing a lock race is not an error. Acquisition retries until a timeout
//! and then reports `false`, leaving retry policy to the caller.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Tunable timings for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockSettings {
    /// How long `acquire` keeps retrying before giving up.
    pub timeout: Duration,
    /// Pause between acquisition attempts.
    pub poll_interval: Duration,
    /// Age past which a timed lock is treated as abandoned and reclaimable.
    pub stale_after: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    owner: String,
    acquired_at: Instant,
    indefinite: bool,
}

/// In-process registry of advisory locks.
pub struct LockRegistry {
    settings: LockSettings,
    locks: Mutex<HashMap<String, LockEntry>>,
}

impl LockRegistry {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(LockSettings::default())
    }

    /// Acquire `key` for `owner`, retrying until the configured timeout.
    ///
    /// Returns `false` if the lock could not be taken in time.
    pub async fn acquire(&self, key: &str, owner: &str) -> bool {
        self.acquire_with_timeout(key, owner, self.settings.timeout)
            .await
    }

    /// Acquire `key` for `owner` with an explicit timeout.
    pub async fn acquire_with_timeout(&self, key: &str, owner: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_insert(key, owner, false) {
                debug!(key, owner, "Lock acquired");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    key,
                    owner,
                    timeout_ms = timeout.as_millis() as u64,
                    "Lock acquisition timed out"
                );
                return false;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Take `key` as an indefinite freeze lock. Single attempt, no retry:
    /// freezing already-contended content is a caller decision, not a wait.
    pub fn acquire_indefinite(&self, key: &str, owner: &str) -> bool {
        let taken = self.try_insert(key, owner, true);
        if taken {
            debug!(key, owner, "Indefinite lock acquired");
        }
        taken
    }

    /// Release `key` if `owner` holds it. Releasing someone else's lock is
    /// refused and logged.
    pub fn release(&self, key: &str, owner: &str) -> bool {
        let mut locks = self.guard();
        match locks.get(key) {
            Some(entry) if entry.owner == owner => {
                locks.remove(key);
                debug!(key, owner, "Lock released");
                true
            }
            Some(entry) => {
                warn!(key, owner, holder = %entry.owner, "Refusing release: not the holder");
                false
            }
            None => false,
        }
    }

    /// Remove `key` regardless of owner. Used to lift freeze locks.
    pub fn force_release(&self, key: &str) -> bool {
        self.guard().remove(key).is_some()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.guard().contains_key(key)
    }

    /// Number of locks currently held.
    pub fn held(&self) -> usize {
        self.guard().len()
    }

    fn try_insert(&self, key: &str, owner: &str, indefinite: bool) -> bool {
        let mut locks = self.guard();
        if let Some(entry) = locks.get(key) {
            let stale =
                !entry.indefinite && entry.acquired_at.elapsed() >= self.settings.stale_after;
            if !stale {
                return false;
            }
            warn!(key, previous_owner = %entry.owner, "Reclaiming stale lock");
        }
        locks.insert(
            key.to_string(),
            LockEntry {
                owner: owner.to_string(),
                acquired_at: Instant::now(),
                indefinite,
            },
        );
        true
    }

    // Lock poisoning only means a holder panicked; the map itself is valid.
    fn guard(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast_settings() -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(5),
            stale_after: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn acquire_free_key_succeeds() {
        let registry = LockRegistry::new(fast_settings());
        assert!(registry.acquire("page:/p/Home", "editor").await);
        assert!(registry.is_locked("page:/p/Home"));
        assert_eq!(registry.held(), 1);
    }

    #[tokio::test]
    async fn contended_acquire_times_out() {
        let registry = LockRegistry::new(fast_settings());
        assert!(registry.acquire("k", "first").await);
        assert!(!registry.acquire("k", "second").await);
        // Still held by the original owner.
        assert!(registry.is_locked("k"));
    }

    #[tokio::test]
    async fn acquire_succeeds_once_holder_releases() {
        let registry = Arc::new(LockRegistry::new(fast_settings()));
        assert!(registry.acquire("k", "first").await);

        let background = registry.clone();
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            background.release("k", "first");
        });

        assert!(registry.acquire("k", "second").await);
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_acquires_yield_one_winner() {
        let registry = Arc::new(LockRegistry::new(fast_settings()));
        let a = registry.clone();
        let b = registry.clone();
        let (won_a, won_b) = tokio::join!(
            async move { a.acquire("k", "a").await },
            async move { b.acquire("k", "b").await },
        );
        assert!(won_a ^ won_b, "exactly one acquisition must win");
    }

    #[tokio::test]
    async fn release_checks_owner() {
        let registry = LockRegistry::new(fast_settings());
        assert!(registry.acquire("k", "alice").await);
        assert!(!registry.release("k", "mallory"));
        assert!(registry.is_locked("k"));
        assert!(registry.release("k", "alice"));
        assert!(!registry.is_locked("k"));
    }

    #[tokio::test]
    async fn release_of_unheld_key_is_false() {
        let registry = LockRegistry::new(fast_settings());
        assert!(!registry.release("missing", "anyone"));
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let registry = LockRegistry::new(fast_settings());
        assert!(registry.acquire("k", "crashed").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.acquire("k", "next").await);
    }

    #[tokio::test]
    async fn indefinite_lock_never_goes_stale() {
        let registry = LockRegistry::new(fast_settings());
        assert!(registry.acquire_indefinite("k", "freeze"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!registry.acquire("k", "next").await);
    }

    #[tokio::test]
    async fn force_release_lifts_indefinite_lock() {
        let registry = LockRegistry::new(fast_settings());
        assert!(registry.acquire_indefinite("k", "freeze"));
        assert!(registry.force_release("k"));
        assert!(registry.acquire("k", "next").await);
    }

    #[tokio::test]
    async fn indefinite_acquire_does_not_retry() {
        let registry = LockRegistry::new(fast_settings());
        assert!(registry.acquire("k", "holder").await);
        assert!(!registry.acquire_indefinite("k", "freeze"));
    }
}
