//! Atomic multi-file phase backups.
//!
//! A phase backup captures the content of many artifacts at once, tagged
//! with descriptive metadata and persisted through the key-value store.
//! Creation and restore both lock every referenced path before touching any
//! of them. Acquisition is all or nothing: already-held locks are released
//! if a later one cannot be taken. The store also hosts the persistence of
//! other layers' records (restore points, the current-phase pointer) so only
//! one component talks to the backing store.

pub mod hooks;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::artifact::{ArtifactFile, ArtifactKind};
use crate::cache::ChangeCache;
use crate::errors::{GovernanceError, Result};
use crate::hash::fingerprint;
use crate::history::VersionHistory;
use crate::locks::LockRegistry;
use crate::snapshot::hooks::SnapshotHook;
use crate::store::KeyValueStore;
use crate::workspace::Workspace;

/// Owner tag for locks taken during backup and restore.
const SNAPSHOT_OWNER: &str = "snapshot-store";

const BACKUP_KEY_PREFIX: &str = "backup:";
const CONFIG_KEY: &str = "config:snapshot";

fn backup_key(id: &str) -> String {
    format!("{BACKUP_KEY_PREFIX}{id}")
}

/// Descriptive metadata attached to a phase backup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub version: String,
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One file captured inside a phase backup. `hash` fingerprints the original
/// content; `content` is the stored form after any hook processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: String,
    pub hash: String,
    pub content: String,
}

/// An atomic multi-file snapshot plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseBackup {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub files: Vec<SnapshotFile>,
    /// Hook names applied to file content, in application order.
    #[serde(default)]
    pub processed_by: Vec<String>,
    pub metadata: BackupMetadata,
}

/// Mutable, persisted snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
    #[serde(default)]
    pub compression_enabled: bool,
    #[serde(default)]
    pub encryption_enabled: bool,
}

fn default_max_backups() -> usize {
    10
}

fn default_backup_interval_secs() -> u64 {
    3600
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
            backup_interval_secs: default_backup_interval_secs(),
            compression_enabled: false,
            encryption_enabled: false,
        }
    }
}

pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
    locks: Arc<LockRegistry>,
    cache: Arc<ChangeCache>,
    history: Arc<VersionHistory>,
    workspace: Arc<Workspace>,
    config: RwLock<SnapshotConfig>,
    hooks: Vec<Arc<dyn SnapshotHook>>,
}

impl SnapshotStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        locks: Arc<LockRegistry>,
        cache: Arc<ChangeCache>,
        history: Arc<VersionHistory>,
        workspace: Arc<Workspace>,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            store,
            locks,
            cache,
            history,
            workspace,
            config: RwLock::new(config),
            hooks: Vec::new(),
        }
    }

    /// Register a post-processing hook. Hooks run in registration order at
    /// backup time and in reverse order at restore time.
    pub fn with_hook(mut self, hook: Arc<dyn SnapshotHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Capture `files` as the phase backup `id`.
    ///
    /// Locks every path first; if any lock cannot be taken the ones already
    /// held are released and the result is `Ok(false)`, with nothing
    /// captured. Component files are also pushed into the version history.
    pub async fn create_phase_backup(
        &self,
        id: &str,
        files: &[ArtifactFile],
        metadata: BackupMetadata,
    ) -> Result<bool> {
        let paths = lock_order(files.iter().map(|f| f.path.as_str()));
        if !self.acquire_all(&paths).await {
            warn!(id, "Backup aborted: could not lock all files");
            return Ok(false);
        }
        let result = self.write_backup(id, files, metadata).await;
        self.release_all(&paths);
        result.map(|_| true)
    }

    async fn write_backup(
        &self,
        id: &str,
        files: &[ArtifactFile],
        metadata: BackupMetadata,
    ) -> Result<()> {
        let config = self.config();
        let active: Vec<Arc<dyn SnapshotHook>> = self
            .hooks
            .iter()
            .filter(|hook| hook.enabled(&config))
            .cloned()
            .collect();

        let mut snapshot_files = Vec::with_capacity(files.len());
        for file in files {
            let stored = apply_hooks(&active, &file.content).map_err(GovernanceError::storage)?;
            snapshot_files.push(SnapshotFile {
                path: file.path.clone(),
                hash: fingerprint(&file.content),
                content: stored,
            });
        }

        let backup = PhaseBackup {
            id: id.to_string(),
            timestamp: Utc::now(),
            files: snapshot_files,
            processed_by: active.iter().map(|h| h.name().to_string()).collect(),
            metadata,
        };
        let value = serde_json::to_value(&backup)
            .context("Failed to serialize phase backup")
            .map_err(GovernanceError::storage)?;
        self.store.set(&backup_key(id), value).await?;

        for file in files {
            if file.kind() == ArtifactKind::Component {
                self.history.save_state(&file.path, &file.content);
            }
        }
        info!(id, files = files.len(), "Phase backup created");
        Ok(())
    }

    /// Bring the backup `id` back as the current content.
    ///
    /// Fails with [`GovernanceError::NotFound`] when no such backup exists.
    /// Returns `Ok(false)` when the referenced paths cannot all be locked.
    /// Restored files flow through the change cache, the version history
    /// (components), and the workspace.
    pub async fn restore_phase(&self, id: &str) -> Result<bool> {
        let backup = self
            .get_backup(id)
            .await?
            .ok_or_else(|| GovernanceError::not_found(format!("phase backup '{id}'")))?;

        let paths = lock_order(backup.files.iter().map(|f| f.path.as_str()));
        if !self.acquire_all(&paths).await {
            warn!(id, "Restore aborted: could not lock all files");
            return Ok(false);
        }
        let result = self.apply_restore(&backup);
        self.release_all(&paths);
        result.map(|_| true)
    }

    fn apply_restore(&self, backup: &PhaseBackup) -> Result<()> {
        let mut restored = Vec::with_capacity(backup.files.len());
        for file in &backup.files {
            let content = self
                .invert_hooks(&backup.processed_by, &file.content)
                .map_err(GovernanceError::storage)?;
            restored.push(ArtifactFile::new(file.path.clone(), content));
        }

        for file in &restored {
            let kind = file.kind();
            self.cache.check(&kind.scoped_key(&file.path), &file.content);
            if kind == ArtifactKind::Component {
                self.history.save_state(&file.path, &file.content);
            }
        }
        self.workspace.record_all(&restored);
        info!(id = %backup.id, files = restored.len(), "Phase restored");
        Ok(())
    }

    pub async fn get_backup(&self, id: &str) -> Result<Option<PhaseBackup>> {
        match self.store.get(&backup_key(id)).await? {
            Some(value) => {
                let backup = serde_json::from_value(value)
                    .context("Failed to parse phase backup")
                    .map_err(GovernanceError::storage)?;
                Ok(Some(backup))
            }
            None => Ok(None),
        }
    }

    /// All stored backups, newest first. Unparseable records are skipped
    /// with a warning rather than failing the listing.
    pub async fn list_backups(&self) -> Result<Vec<PhaseBackup>> {
        let keys = self.store.keys().await?;
        let mut backups = Vec::new();
        for key in keys.iter().filter(|k| k.starts_with(BACKUP_KEY_PREFIX)) {
            if let Some(value) = self.store.get(key).await? {
                match serde_json::from_value::<PhaseBackup>(value) {
                    Ok(backup) => backups.push(backup),
                    Err(err) => warn!(key, error = %err, "Skipping unparseable backup record"),
                }
            }
        }
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    /// Delete the oldest backups until the count fits `max_backups`.
    /// Returns how many were removed.
    pub async fn prune_old_backups(&self) -> Result<usize> {
        let max = self.config().max_backups;
        let mut backups = self.list_backups().await?;
        if backups.len() <= max {
            return Ok(0);
        }

        let excess = backups.split_off(max);
        let mut removed = 0;
        for backup in &excess {
            if self.store.remove(&backup_key(&backup.id)).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, max, "Pruned old phase backups");
        }
        Ok(removed)
    }

    pub fn config(&self) -> SnapshotConfig {
        self.config_read().clone()
    }

    /// Replace the snapshot configuration and persist it.
    pub async fn update_config(&self, config: SnapshotConfig) -> Result<()> {
        *self.config_write() = config;
        self.persist_config().await
    }

    pub async fn persist_config(&self) -> Result<()> {
        let value = serde_json::to_value(self.config())
            .context("Failed to serialize snapshot config")
            .map_err(GovernanceError::storage)?;
        self.store.set(CONFIG_KEY, value).await
    }

    /// Load the persisted configuration, if any. Returns whether one was found.
    pub async fn load_persisted_config(&self) -> Result<bool> {
        match self.store.get(CONFIG_KEY).await? {
            Some(value) => {
                let config: SnapshotConfig = serde_json::from_value(value)
                    .context("Failed to parse persisted snapshot config")
                    .map_err(GovernanceError::storage)?;
                *self.config_write() = config;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn has_persisted_config(&self) -> Result<bool> {
        Ok(self.store.get(CONFIG_KEY).await?.is_some())
    }

    // Other layers (restore points, the current-phase pointer) delegate their
    // persistence here instead of holding their own store handle.

    pub async fn persist_record(&self, key: &str, value: Value) -> Result<()> {
        self.store.set(key, value).await
    }

    pub async fn load_record(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(key).await
    }

    pub async fn load_records(&self, prefix: &str) -> Result<Vec<Value>> {
        let keys = self.store.keys().await?;
        let mut values = Vec::new();
        for key in keys.iter().filter(|k| k.starts_with(prefix)) {
            if let Some(value) = self.store.get(key).await? {
                values.push(value);
            }
        }
        Ok(values)
    }

    async fn acquire_all(&self, paths: &[&str]) -> bool {
        let mut held: Vec<&str> = Vec::with_capacity(paths.len());
        for path in paths {
            if self.locks.acquire(path, SNAPSHOT_OWNER).await {
                held.push(path);
            } else {
                // All-or-nothing: back out of everything taken so far.
                for taken in held {
                    self.locks.release(taken, SNAPSHOT_OWNER);
                }
                return false;
            }
        }
        true
    }

    fn release_all(&self, paths: &[&str]) {
        for path in paths {
            self.locks.release(path, SNAPSHOT_OWNER);
        }
    }

    fn invert_hooks(&self, processed_by: &[String], stored: &str) -> anyhow::Result<String> {
        if processed_by.is_empty() {
            return Ok(stored.to_string());
        }
        let mut data = STANDARD
            .decode(stored)
            .context("Failed to decode stored snapshot content")?;
        for name in processed_by.iter().rev() {
            let hook = self
                .hooks
                .iter()
                .find(|h| h.name() == name)
                .ok_or_else(|| anyhow::anyhow!("Unknown snapshot hook '{name}'"))?;
            data = hook
                .restore(&data)
                .with_context(|| format!("Hook '{name}' failed to restore content"))?;
        }
        String::from_utf8(data).context("Restored content is not valid UTF-8")
    }

    fn config_read(&self) -> RwLockReadGuard<'_, SnapshotConfig> {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn config_write(&self) -> RwLockWriteGuard<'_, SnapshotConfig> {
        self.config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Canonical lock acquisition order: sorted, deduplicated paths. Sorting
/// keeps concurrent multi-file operations from deadlocking each other.
fn lock_order<'a>(paths: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut ordered: Vec<&str> = paths.collect();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}

/// Hook chain applied at backup time. With no active hooks the content is
/// stored as-is; otherwise the processed bytes are base64-encoded.
fn apply_hooks(hooks: &[Arc<dyn SnapshotHook>], content: &str) -> anyhow::Result<String> {
    if hooks.is_empty() {
        return Ok(content.to_string());
    }
    let mut data = content.as_bytes().to_vec();
    for hook in hooks {
        data = hook
            .process(&data)
            .with_context(|| format!("Hook '{}' failed to process content", hook.name()))?;
    }
    Ok(STANDARD.encode(data))
}

#[cfg(test)]
mod tests {
    use super::hooks::GzipHook;
    use super::*;
    use crate::locks::LockSettings;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct Services {
        locks: Arc<LockRegistry>,
        cache: Arc<ChangeCache>,
        history: Arc<VersionHistory>,
        workspace: Arc<Workspace>,
        store: Arc<MemoryStore>,
    }

    fn services() -> Services {
        Services {
            locks: Arc::new(LockRegistry::new(LockSettings {
                timeout: Duration::from_millis(30),
                poll_interval: Duration::from_millis(5),
                stale_after: Duration::from_millis(500),
            })),
            cache: Arc::new(ChangeCache::with_defaults()),
            history: Arc::new(VersionHistory::with_defaults()),
            workspace: Arc::new(Workspace::new()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn snapshot_store(services: &Services, config: SnapshotConfig) -> SnapshotStore {
        SnapshotStore::new(
            services.store.clone(),
            services.locks.clone(),
            services.cache.clone(),
            services.history.clone(),
            services.workspace.clone(),
            config,
        )
    }

    fn meta(description: &str) -> BackupMetadata {
        BackupMetadata {
            version: "1.0".to_string(),
            description: description.to_string(),
            author: "tester".to_string(),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn backup_roundtrip_preserves_files() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        let files = vec![
            ArtifactFile::new("/p/Home", "<h1>Home</h1>"),
            ArtifactFile::new("/components/Button", "<button/>"),
        ];
        assert!(
            store
                .create_phase_backup("phase-1", &files, meta("initial"))
                .await
                .unwrap()
        );

        let backup = store.get_backup("phase-1").await.unwrap().unwrap();
        assert_eq!(backup.files.len(), 2);
        assert!(backup.processed_by.is_empty());
        let button = backup
            .files
            .iter()
            .find(|f| f.path == "/components/Button")
            .unwrap();
        assert_eq!(button.content, "<button/>");
        assert_eq!(button.hash, fingerprint("<button/>"));
    }

    #[tokio::test]
    async fn backup_saves_component_history() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        let files = vec![
            ArtifactFile::new("/components/A", "component content"),
            ArtifactFile::new("/p/Home", "page content"),
        ];
        store
            .create_phase_backup("phase-1", &files, meta("x"))
            .await
            .unwrap();
        assert_eq!(services.history.versions("/components/A").len(), 1);
        assert!(services.history.versions("/p/Home").is_empty());
    }

    #[tokio::test]
    async fn partial_lock_failure_releases_held_locks() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        // Hold the later path in lock order so the first acquisition succeeds
        // and the second fails.
        assert!(services.locks.acquire("/components/B", "someone-else").await);

        let files = vec![
            ArtifactFile::new("/components/A", "a"),
            ArtifactFile::new("/components/B", "b"),
        ];
        let created = store
            .create_phase_backup("phase-1", &files, meta("x"))
            .await
            .unwrap();
        assert!(!created);
        // The successfully acquired lock must have been backed out.
        assert!(!services.locks.is_locked("/components/A"));
        assert!(store.get_backup("phase-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backup_locks_are_released_after_success() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        let files = vec![ArtifactFile::new("/components/A", "a")];
        store
            .create_phase_backup("phase-1", &files, meta("x"))
            .await
            .unwrap();
        assert_eq!(services.locks.held(), 0);
    }

    #[tokio::test]
    async fn restore_missing_backup_is_not_found() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        let err = store.restore_phase("ghost").await.unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn restore_repopulates_cache_history_and_workspace() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        let files = vec![
            ArtifactFile::new("/components/A", "component v1"),
            ArtifactFile::new("/p/Home", "page v1"),
        ];
        store
            .create_phase_backup("phase-1", &files, meta("x"))
            .await
            .unwrap();

        assert!(store.restore_phase("phase-1").await.unwrap());
        assert_eq!(
            services.workspace.get("/components/A").as_deref(),
            Some("component v1")
        );
        assert_eq!(
            services.cache.cached("page:/p/Home").as_deref(),
            Some("page v1")
        );
        // Backup saved v1, restore found the same hash on top: still one entry.
        assert_eq!(services.history.versions("/components/A").len(), 1);
        assert_eq!(services.locks.held(), 0);
    }

    #[tokio::test]
    async fn twelve_backups_prune_to_ten_newest() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        for i in 0..12 {
            let files = vec![ArtifactFile::new("/p/Home", format!("v{i}"))];
            store
                .create_phase_backup(&format!("phase-{i}"), &files, meta("x"))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(store.prune_old_backups().await.unwrap(), 2);
        let remaining = store.list_backups().await.unwrap();
        assert_eq!(remaining.len(), 10);
        assert!(remaining.iter().all(|b| b.id != "phase-0"));
        assert!(remaining.iter().all(|b| b.id != "phase-1"));
        assert_eq!(remaining.first().unwrap().id, "phase-11");
        // A second prune has nothing left to do.
        assert_eq!(store.prune_old_backups().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn compression_hook_applies_and_inverts() {
        let services = services();
        let config = SnapshotConfig {
            compression_enabled: true,
            ..SnapshotConfig::default()
        };
        let store = snapshot_store(&services, config).with_hook(Arc::new(GzipHook));

        let content = "<div>".repeat(50);
        let files = vec![ArtifactFile::new("/components/Big", content.clone())];
        store
            .create_phase_backup("phase-1", &files, meta("compressed"))
            .await
            .unwrap();

        let backup = store.get_backup("phase-1").await.unwrap().unwrap();
        assert_eq!(backup.processed_by, vec!["gzip"]);
        assert_ne!(backup.files[0].content, content);
        assert_eq!(backup.files[0].hash, fingerprint(&content));

        assert!(store.restore_phase("phase-1").await.unwrap());
        assert_eq!(services.workspace.get("/components/Big"), Some(content));
    }

    #[tokio::test]
    async fn disabled_hook_stays_out_of_the_chain() {
        let services = services();
        let store =
            snapshot_store(&services, SnapshotConfig::default()).with_hook(Arc::new(GzipHook));
        let files = vec![ArtifactFile::new("/p/Home", "plain")];
        store
            .create_phase_backup("phase-1", &files, meta("x"))
            .await
            .unwrap();
        let backup = store.get_backup("phase-1").await.unwrap().unwrap();
        assert!(backup.processed_by.is_empty());
        assert_eq!(backup.files[0].content, "plain");
    }

    #[tokio::test]
    async fn config_persists_and_reloads() {
        let services = services();
        let store = snapshot_store(&services, SnapshotConfig::default());
        assert!(!store.has_persisted_config().await.unwrap());

        let updated = SnapshotConfig {
            max_backups: 5,
            ..SnapshotConfig::default()
        };
        store.update_config(updated.clone()).await.unwrap();
        assert!(store.has_persisted_config().await.unwrap());

        // A fresh snapshot store over the same backing store picks it up.
        let fresh = snapshot_store(&services, SnapshotConfig::default());
        assert!(fresh.load_persisted_config().await.unwrap());
        assert_eq!(fresh.config(), updated);
    }
}
