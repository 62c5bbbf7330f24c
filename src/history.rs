//! Bounded per-artifact version history.
//!
//! Each artifact keeps up to ten prior content snapshots in FIFO order.
//! Consecutive saves with the same fingerprint collapse to one entry, so the
//! history records actual change, not save traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hash::fingerprint;

const DEFAULT_MAX_VERSIONS: usize = 10;

/// One historical content snapshot of a single artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedState {
    pub artifact_id: String,
    pub version: u32,
    pub content: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

type StateMap = HashMap<String, VecDeque<VersionedState>>;

/// FIFO-bounded store of `VersionedState`s keyed by artifact id.
pub struct VersionHistory {
    max_versions: usize,
    states: RwLock<StateMap>,
}

impl VersionHistory {
    pub fn new(max_versions: usize) -> Self {
        Self {
            max_versions,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Ten versions per artifact.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_VERSIONS)
    }

    /// Record `content` as the newest state of `artifact_id`.
    ///
    /// Returns the assigned version number, or `None` when the content
    /// matches the most recent entry (nothing saved). Oldest entries are
    /// evicted once the per-artifact cap is exceeded.
    pub fn save_state(&self, artifact_id: &str, content: &str) -> Option<u32> {
        let hash = fingerprint(content);
        let mut states = self.write_guard();
        let entries = states.entry(artifact_id.to_string()).or_default();

        if let Some(last) = entries.back() {
            if last.hash == hash {
                debug!(artifact_id, "Content matches latest version, not saving");
                return None;
            }
        }

        let version = entries.back().map(|s| s.version + 1).unwrap_or(1);
        entries.push_back(VersionedState {
            artifact_id: artifact_id.to_string(),
            version,
            content: content.to_string(),
            hash,
            timestamp: Utc::now(),
        });
        while entries.len() > self.max_versions {
            entries.pop_front();
        }
        debug!(artifact_id, version, "Saved versioned state");
        Some(version)
    }

    /// Fetch the state to roll back to.
    ///
    /// With an explicit `version`, that exact entry. Without one, the
    /// second-to-last entry, i.e. the state before the current (possibly
    /// broken) one. `None` means there is nothing to roll back to, which callers
    /// must not treat as an error.
    pub fn rollback(&self, artifact_id: &str, version: Option<u32>) -> Option<VersionedState> {
        let states = self.read_guard();
        let entries = states.get(artifact_id)?;
        match version {
            Some(v) => entries.iter().find(|s| s.version == v).cloned(),
            None => {
                if entries.len() < 2 {
                    return None;
                }
                entries.get(entries.len() - 2).cloned()
            }
        }
    }

    /// All retained states for an artifact, oldest first.
    pub fn versions(&self, artifact_id: &str) -> Vec<VersionedState> {
        self.read_guard()
            .get(artifact_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, artifact_id: &str) -> Option<VersionedState> {
        self.read_guard()
            .get(artifact_id)
            .and_then(|entries| entries.back().cloned())
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, StateMap> {
        self.states
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, StateMap> {
        self.states
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
