//! Approval ledger: the durable record of reviewed content.
//!
//! Every approval upserts a per-(kind, path) record carrying the content
//! fingerprint, a monotonically increasing version, and the approval status.
//! Records are mutated but never deleted, so the ledger doubles as an audit
//! trail. Approvals also fan side effects into the change cache, the
//! version history (components only), and the workspace.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::ArtifactKind;
use crate::cache::ChangeCache;
use crate::errors::{GovernanceError, Result};
use crate::hash::fingerprint;
use crate::history::VersionHistory;
use crate::locks::LockRegistry;
use crate::workspace::Workspace;

/// Owner tag for locks taken during ledger mutations.
const LEDGER_OWNER: &str = "approval-ledger";
/// Owner tag for indefinite freeze locks on approved content.
const FREEZE_OWNER: &str = "content-freeze";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Approved,
    Revoked,
}

/// The durable statement that an artifact's content has been accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub kind: ArtifactKind,
    pub path: String,
    pub content_hash: String,
    pub status: ApprovalState,
    pub version: u32,
    pub approved_at: DateTime<Utc>,
}

type RecordMap = HashMap<String, ApprovalRecord>;

pub struct ApprovalLedger {
    locks: Arc<LockRegistry>,
    cache: Arc<ChangeCache>,
    history: Arc<VersionHistory>,
    workspace: Arc<Workspace>,
    records: RwLock<RecordMap>,
}

impl ApprovalLedger {
    pub fn new(
        locks: Arc<LockRegistry>,
        cache: Arc<ChangeCache>,
        history: Arc<VersionHistory>,
        workspace: Arc<Workspace>,
    ) -> Self {
        Self {
            locks,
            cache,
            history,
            workspace,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Approve `content` for the artifact at (`kind`, `path`).
    ///
    /// Acquires the artifact's lock for the duration of the mutation and
    /// returns `false` if it cannot be taken, including when the artifact
    /// is frozen by [`lock_approved_content`](Self::lock_approved_content).
    /// On success the record's version increments, the change cache and
    /// workspace are updated, and component content is pushed into the
    /// version history.
    pub async fn approve(&self, kind: ArtifactKind, path: &str, content: &str) -> bool {
        let key = kind.scoped_key(path);
        if !self.locks.acquire(&key, LEDGER_OWNER).await {
            warn!(%kind, path, "Approval aborted: could not lock artifact");
            return false;
        }

        let hash = fingerprint(content);
        let version = {
            let mut records = self.write_guard();
            let version = records.get(&key).map(|r| r.version + 1).unwrap_or(1);
            records.insert(
                key.clone(),
                ApprovalRecord {
                    kind,
                    path: path.to_string(),
                    content_hash: hash.clone(),
                    status: ApprovalState::Approved,
                    version,
                    approved_at: Utc::now(),
                },
            );
            version
        };

        self.cache.check(&key, content);
        if kind == ArtifactKind::Component {
            self.history.save_state(path, content);
        }
        self.workspace.record(path, content);

        self.locks.release(&key, LEDGER_OWNER);
        info!(%kind, path, version, hash = %hash, "Content approved");
        true
    }

    /// True iff `content` hashes to the last approved hash for the artifact
    /// and the record still has approved status.
    pub fn check_approval(&self, kind: ArtifactKind, path: &str, content: &str) -> bool {
        let key = kind.scoped_key(path);
        let records = self.read_guard();
        match records.get(&key) {
            Some(record) => {
                record.status == ApprovalState::Approved
                    && record.content_hash == fingerprint(content)
            }
            None => false,
        }
    }

    /// Freeze an approved artifact under an indefinite lock.
    ///
    /// The freeze blocks further approvals until
    /// [`unlock_content`](Self::unlock_content). Fails with
    /// [`GovernanceError::NotApproved`] when no approved record exists;
    /// returns `Ok(false)` when the artifact's lock is already held.
    pub fn lock_approved_content(&self, kind: ArtifactKind, path: &str) -> Result<bool> {
        let approved = {
            let records = self.read_guard();
            records
                .get(&kind.scoped_key(path))
                .map(|r| r.status == ApprovalState::Approved)
                .unwrap_or(false)
        };
        if !approved {
            return Err(GovernanceError::NotApproved {
                kind,
                path: path.to_string(),
            });
        }

        let taken = self.locks.acquire_indefinite(&kind.scoped_key(path), FREEZE_OWNER);
        if taken {
            info!(%kind, path, "Approved content frozen");
        }
        Ok(taken)
    }

    /// Lift any lock on the artifact, frozen or otherwise.
    pub fn unlock_content(&self, kind: ArtifactKind, path: &str) -> bool {
        let released = self.locks.force_release(&kind.scoped_key(path));
        if released {
            info!(%kind, path, "Content unlocked");
        }
        released
    }

    /// Mark an artifact's approval as revoked. The record stays on the books
    /// with its version intact; only the status flips.
    pub async fn revoke(&self, kind: ArtifactKind, path: &str) -> bool {
        let key = kind.scoped_key(path);
        if !self.locks.acquire(&key, LEDGER_OWNER).await {
            warn!(%kind, path, "Revocation aborted: could not lock artifact");
            return false;
        }

        let revoked = {
            let mut records = self.write_guard();
            match records.get_mut(&key) {
                Some(record) => {
                    record.status = ApprovalState::Revoked;
                    true
                }
                None => false,
            }
        };

        self.locks.release(&key, LEDGER_OWNER);
        if revoked {
            info!(%kind, path, "Approval revoked");
        } else {
            debug!(%kind, path, "Nothing to revoke");
        }
        revoked
    }

    pub fn status(&self, kind: ArtifactKind, path: &str) -> Option<ApprovalRecord> {
        self.read_guard().get(&kind.scoped_key(path)).cloned()
    }

    /// Every record on the books, in no particular order.
    pub fn records(&self) -> Vec<ApprovalRecord> {
        self.read_guard().values().cloned().collect()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, RecordMap> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, RecordMap> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
