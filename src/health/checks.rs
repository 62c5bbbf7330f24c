//! The built-in health check battery.
//!
//! Each check is a predicate over the shared [`CheckContext`], optionally
//! paired with a one-shot fix. Checks report booleans and log their own
//! diagnostics; they never error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::artifact::ArtifactKind;
use crate::ledger::{ApprovalLedger, ApprovalState};
use crate::probes::{HttpProbe, StoreProbe};
use crate::snapshot::SnapshotStore;
use crate::workspace::Workspace;

/// Everything a check may inspect or repair.
pub struct CheckContext {
    pub ledger: Arc<ApprovalLedger>,
    pub snapshot: Arc<SnapshotStore>,
    pub workspace: Arc<Workspace>,
    pub store_probe: Arc<dyn StoreProbe>,
    pub http_probe: Arc<dyn HttpProbe>,
    /// Base URL prepended to page paths for reachability probing. Empty
    /// string disables the content-route check.
    pub base_url: String,
}

/// One health predicate with an optional auto-fix.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, ctx: &CheckContext) -> bool;

    fn has_fix(&self) -> bool {
        false
    }

    /// Attempt the repair. Returns whether the fix itself succeeded; the
    /// caller re-evaluates `check` afterwards.
    async fn apply_fix(&self, ctx: &CheckContext) -> bool {
        let _ = ctx;
        false
    }
}

/// The snapshot configuration record must exist in the backing store.
/// Fixable by persisting the current in-memory configuration.
pub struct ConfigPresent;

#[async_trait]
impl HealthCheck for ConfigPresent {
    fn name(&self) -> &str {
        "config-record"
    }

    async fn check(&self, ctx: &CheckContext) -> bool {
        ctx.snapshot.has_persisted_config().await.unwrap_or(false)
    }

    fn has_fix(&self) -> bool {
        true
    }

    async fn apply_fix(&self, ctx: &CheckContext) -> bool {
        ctx.snapshot.persist_config().await.is_ok()
    }
}

/// The backing store must answer queries.
pub struct StoreReachable;

#[async_trait]
impl HealthCheck for StoreReachable {
    fn name(&self) -> &str {
        "store-connectivity"
    }

    async fn check(&self, ctx: &CheckContext) -> bool {
        ctx.store_probe.is_reachable().await
    }
}

/// Every approval record must be internally sound: non-empty hash, version
/// at least one, and approved artifacts present in the workspace.
pub struct RouteIntegrity;

#[async_trait]
impl HealthCheck for RouteIntegrity {
    fn name(&self) -> &str {
        "route-integrity"
    }

    async fn check(&self, ctx: &CheckContext) -> bool {
        ctx.ledger.records().into_iter().all(|record| {
            let sound = !record.content_hash.is_empty() && record.version >= 1;
            let present = record.status != ApprovalState::Approved
                || ctx.workspace.get(&record.path).is_some();
            if !sound || !present {
                warn!(path = %record.path, kind = %record.kind, "Approval record failed integrity scan");
            }
            sound && present
        })
    }
}

/// Every approved page must answer at its public route.
pub struct ContentRoutes;

#[async_trait]
impl HealthCheck for ContentRoutes {
    fn name(&self) -> &str {
        "content-routes"
    }

    async fn check(&self, ctx: &CheckContext) -> bool {
        if ctx.base_url.is_empty() {
            return true;
        }
        let pages: Vec<_> = ctx
            .ledger
            .records()
            .into_iter()
            .filter(|r| r.kind == ArtifactKind::Page && r.status == ApprovalState::Approved)
            .collect();
        for record in pages {
            let url = format!("{}{}", ctx.base_url.trim_end_matches('/'), record.path);
            if !ctx.http_probe.is_reachable(&url).await {
                warn!(url, "Content route unreachable");
                return false;
            }
        }
        true
    }
}
