//! Phase completion and restore, composed from the snapshot store and the
//! approval ledger.
//!
//! Completing a phase backs up the files atomically, approves and freezes
//! the governed content, and records the phase as current. Failure at any
//! step is reported as `false`, never as a panic or propagated error; the
//! caller decides whether to retry.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifact::{ArtifactFile, ArtifactKind};
use crate::errors::Result;
use crate::ledger::ApprovalLedger;
use crate::snapshot::{BackupMetadata, SnapshotStore};
use crate::workspace::Workspace;

const CURRENT_PHASE_KEY: &str = "phase:current";

/// Identity and metadata for a phase about to be completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PhaseConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: String::new(),
            description: String::new(),
            author: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn metadata(&self) -> BackupMetadata {
        BackupMetadata {
            version: self.version.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            tags: self.tags.clone(),
        }
    }
}

pub struct PhaseOrchestrator {
    snapshot: Arc<SnapshotStore>,
    ledger: Arc<ApprovalLedger>,
    workspace: Arc<Workspace>,
    current: RwLock<Option<String>>,
}

impl PhaseOrchestrator {
    pub fn new(
        snapshot: Arc<SnapshotStore>,
        ledger: Arc<ApprovalLedger>,
        workspace: Arc<Workspace>,
    ) -> Self {
        Self {
            snapshot,
            ledger,
            workspace,
            current: RwLock::new(None),
        }
    }

    /// Complete a phase: back up `files`, approve every component, freeze
    /// every file, record the phase as current.
    ///
    /// Non-component files must already carry an approval or the freeze step
    /// fails the phase. Any failure, including lock contention or a missing
    /// approval, comes back as `false`.
    pub async fn complete_phase(&self, files: &[ArtifactFile], phase: &PhaseConfig) -> bool {
        match self.run_complete(files, phase).await {
            Ok(completed) => completed,
            Err(err) => {
                warn!(phase = %phase.id, error = %err, "Phase completion failed");
                false
            }
        }
    }

    async fn run_complete(&self, files: &[ArtifactFile], phase: &PhaseConfig) -> Result<bool> {
        if !self
            .snapshot
            .create_phase_backup(&phase.id, files, phase.metadata())
            .await?
        {
            return Ok(false);
        }
        self.workspace.record_all(files);

        for file in files {
            if file.kind() == ArtifactKind::Component
                && !self
                    .ledger
                    .approve(ArtifactKind::Component, &file.path, &file.content)
                    .await
            {
                warn!(phase = %phase.id, path = %file.path, "Component approval failed");
                return Ok(false);
            }
        }
        for file in files {
            if !self.ledger.lock_approved_content(file.kind(), &file.path)? {
                warn!(phase = %phase.id, path = %file.path, "Could not freeze file");
                return Ok(false);
            }
        }

        self.set_current(&phase.id).await?;
        info!(phase = %phase.id, files = files.len(), "Phase completed");
        Ok(true)
    }

    /// Restore a previously completed phase and, on success, point the
    /// current-phase marker at it.
    pub async fn restore_phase(&self, id: &str) -> bool {
        match self.run_restore(id).await {
            Ok(restored) => restored,
            Err(err) => {
                warn!(phase = id, error = %err, "Phase restore failed");
                false
            }
        }
    }

    async fn run_restore(&self, id: &str) -> Result<bool> {
        if !self.snapshot.restore_phase(id).await? {
            return Ok(false);
        }
        self.set_current(id).await?;
        info!(phase = id, "Phase restored as current");
        Ok(true)
    }

    pub fn current_phase(&self) -> Option<String> {
        self.current_read().clone()
    }

    /// Reload the current-phase pointer persisted by an earlier run.
    pub async fn hydrate(&self) -> Result<()> {
        if let Some(value) = self.snapshot.load_record(CURRENT_PHASE_KEY).await? {
            if let Some(phase) = value.get("phase").and_then(|v| v.as_str()) {
                *self.current_write() = Some(phase.to_string());
            }
        }
        Ok(())
    }

    async fn set_current(&self, id: &str) -> Result<()> {
        *self.current_write() = Some(id.to_string());
        self.snapshot
            .persist_record(CURRENT_PHASE_KEY, serde_json::json!({ "phase": id }))
            .await
    }

    fn current_read(&self) -> RwLockReadGuard<'_, Option<String>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_write(&self) -> RwLockWriteGuard<'_, Option<String>> {
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
