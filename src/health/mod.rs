//! Health monitoring and recovery points.
//!
//! The monitor runs a fixed battery of checks, applying each check's fix at
//! most once before re-evaluating. Restore points pair a phase backup of the
//! whole workspace with the check outcome at creation time: stable when the
//! battery passed, unstable otherwise. Restoring to a point replays the
//! backup and then re-verifies the battery.

pub mod checks;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{GovernanceError, Result};
use crate::health::checks::{
    CheckContext, ConfigPresent, ContentRoutes, HealthCheck, RouteIntegrity, StoreReachable,
};
use crate::snapshot::BackupMetadata;

const RESTORE_POINT_KEY_PREFIX: &str = "restore-point:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePointKind {
    Auto,
    Manual,
}

impl std::fmt::Display for RestorePointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestorePointKind::Auto => write!(f, "auto"),
            RestorePointKind::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePointStatus {
    Stable,
    Unstable,
}

/// A health-checked reference to a phase backup. Append-only: points are
/// never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RestorePointKind,
    pub status: RestorePointStatus,
}

/// Outcome of one check, including whether a fix brought it to pass.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub fixed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Error out on the first failing check, for callers that treat an
    /// unhealthy engine as fatal.
    pub fn ensure_passed(&self) -> Result<()> {
        match self.results.iter().find(|r| !r.passed) {
            Some(result) => Err(GovernanceError::Check {
                name: result.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

pub struct HealthMonitor {
    ctx: CheckContext,
    checks: Vec<Box<dyn HealthCheck>>,
    points: RwLock<Vec<RestorePoint>>,
}

impl HealthMonitor {
    /// A monitor with no checks registered. Useful as a base for
    /// [`with_check`](Self::with_check).
    pub fn new(ctx: CheckContext) -> Self {
        Self {
            ctx,
            checks: Vec::new(),
            points: RwLock::new(Vec::new()),
        }
    }

    /// The standard battery: persisted configuration, store connectivity,
    /// approval-record integrity, content-route reachability.
    pub fn with_default_checks(ctx: CheckContext) -> Self {
        Self::new(ctx)
            .with_check(Box::new(ConfigPresent))
            .with_check(Box::new(StoreReachable))
            .with_check(Box::new(RouteIntegrity))
            .with_check(Box::new(ContentRoutes))
    }

    pub fn with_check(mut self, check: Box<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Run every check in order. A failing check with a fix gets the fix
    /// applied once and is then re-evaluated; nothing here ever errors.
    pub async fn run_checks(&self) -> CheckReport {
        let mut report = CheckReport::default();
        for check in &self.checks {
            let mut passed = check.check(&self.ctx).await;
            let mut fixed = false;
            if !passed && check.has_fix() {
                info!(check = check.name(), "Check failed, attempting fix");
                if check.apply_fix(&self.ctx).await {
                    passed = check.check(&self.ctx).await;
                    fixed = passed;
                }
            }
            if !passed {
                warn!(check = check.name(), "Health check failed");
            }
            report.results.push(CheckResult {
                name: check.name().to_string(),
                passed,
                fixed,
            });
        }
        report
    }

    /// Snapshot the current workspace as a restore point.
    ///
    /// The point's status records whether the check battery passed at
    /// creation time; an unstable point is still created and marks a known
    /// state, healthy or not.
    pub async fn create_restore_point(&self, kind: RestorePointKind) -> Result<String> {
        let report = self.run_checks().await;
        let id = format!("restore-{}", Uuid::new_v4());
        let files = self.ctx.workspace.snapshot();
        let metadata = BackupMetadata {
            version: String::new(),
            description: format!("{kind} restore point"),
            author: "health-monitor".to_string(),
            tags: vec!["restore-point".to_string()],
        };

        if !self
            .ctx
            .snapshot
            .create_phase_backup(&id, &files, metadata)
            .await?
        {
            return Err(GovernanceError::storage(anyhow::anyhow!(
                "Could not lock workspace files for restore point '{id}'"
            )));
        }

        let status = if report.all_passed() {
            RestorePointStatus::Stable
        } else {
            RestorePointStatus::Unstable
        };
        let point = RestorePoint {
            id: id.clone(),
            timestamp: Utc::now(),
            kind,
            status,
        };
        let value = serde_json::to_value(&point)
            .map_err(|e| GovernanceError::storage(anyhow::Error::from(e)))?;
        self.ctx
            .snapshot
            .persist_record(&format!("{RESTORE_POINT_KEY_PREFIX}{id}"), value)
            .await?;
        self.points_write().push(point);
        info!(id, %kind, ?status, "Restore point created");
        Ok(id)
    }

    /// Restore the workspace to a previously created point and re-verify.
    ///
    /// `Ok(false)` covers both lock contention during the restore and a
    /// failing post-restore check battery; unknown ids are `NotFound`.
    pub async fn restore_to_point(&self, id: &str) -> Result<bool> {
        let known = self.points_read().iter().any(|p| p.id == id);
        if !known {
            return Err(GovernanceError::not_found(format!("restore point '{id}'")));
        }

        if !self.ctx.snapshot.restore_phase(id).await? {
            return Ok(false);
        }

        let report = self.run_checks().await;
        if !report.all_passed() {
            for result in report.results.iter().filter(|r| !r.passed) {
                warn!(check = %result.name, "Post-restore check failed");
            }
            return Ok(false);
        }
        info!(id, "Restored to point");
        Ok(true)
    }

    /// Restore points known to this monitor, oldest first.
    pub fn restore_points(&self) -> Vec<RestorePoint> {
        self.points_read().clone()
    }

    /// Reload restore points persisted by earlier runs. Returns how many
    /// were loaded.
    pub async fn hydrate(&self) -> Result<usize> {
        let values = self
            .ctx
            .snapshot
            .load_records(RESTORE_POINT_KEY_PREFIX)
            .await?;
        let mut loaded = Vec::new();
        for value in values {
            match serde_json::from_value::<RestorePoint>(value) {
                Ok(point) => loaded.push(point),
                Err(err) => warn!(error = %err, "Skipping unparseable restore point"),
            }
        }
        loaded.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let count = loaded.len();
        *self.points_write() = loaded;
        Ok(count)
    }

    fn points_read(&self) -> RwLockReadGuard<'_, Vec<RestorePoint>> {
        self.points
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn points_write(&self) -> RwLockWriteGuard<'_, Vec<RestorePoint>> {
        self.points
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::checks::test_support::context;
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StaticCheck {
        name: &'static str,
        result: bool,
    }

    #[async_trait]
    impl HealthCheck for StaticCheck {
        fn name(&self) -> &str {
            self.name
        }
        async fn check(&self, _ctx: &CheckContext) -> bool {
            self.result
        }
    }

    /// Fails until its fix is applied.
    struct RepairableCheck {
        repaired: Arc<AtomicBool>,
    }

    #[async_trait]
    impl HealthCheck for RepairableCheck {
        fn name(&self) -> &str {
            "repairable"
        }
        async fn check(&self, _ctx: &CheckContext) -> bool {
            self.repaired.load(Ordering::SeqCst)
        }
        fn has_fix(&self) -> bool {
            true
        }
        async fn apply_fix(&self, _ctx: &CheckContext) -> bool {
            self.repaired.store(true, Ordering::SeqCst);
            true
        }
    }

    /// Passes for the first `passes` evaluations, then fails.
    struct DecayingCheck {
        passes: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthCheck for DecayingCheck {
        fn name(&self) -> &str {
            "decaying"
        }
        async fn check(&self, _ctx: &CheckContext) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) < self.passes
        }
    }

    #[tokio::test]
    async fn failing_check_with_fix_is_repaired_once() {
        let monitor = HealthMonitor::new(context(true, true, "")).with_check(Box::new(
            RepairableCheck {
                repaired: Arc::new(AtomicBool::new(false)),
            },
        ));
        let report = monitor.run_checks().await;
        assert!(report.all_passed());
        assert!(report.results[0].fixed);

        // Already healthy on the second run: no fix involved.
        let report = monitor.run_checks().await;
        assert!(report.results[0].passed);
        assert!(!report.results[0].fixed);
    }

    #[tokio::test]
    async fn failing_check_without_fix_stays_failed() {
        let monitor = HealthMonitor::new(context(true, true, "")).with_check(Box::new(
            StaticCheck {
                name: "always-down",
                result: false,
            },
        ));
        let report = monitor.run_checks().await;
        assert!(!report.all_passed());
        assert!(!report.results[0].fixed);
        assert!(matches!(
            report.ensure_passed(),
            Err(GovernanceError::Check { name }) if name == "always-down"
        ));
    }

    #[tokio::test]
    async fn default_battery_self_heals_missing_config() {
        let monitor = HealthMonitor::with_default_checks(context(true, true, ""));
        let report = monitor.run_checks().await;
        // The config record is absent on first run and repaired in place.
        assert!(report.all_passed());
        let config_result = report
            .results
            .iter()
            .find(|r| r.name == "config-record")
            .unwrap();
        assert!(config_result.fixed);
    }

    #[tokio::test]
    async fn restore_point_status_reflects_checks() {
        let healthy = HealthMonitor::with_default_checks(context(true, true, ""));
        let id = healthy
            .create_restore_point(RestorePointKind::Manual)
            .await
            .unwrap();
        let points = healthy.restore_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, id);
        assert_eq!(points[0].kind, RestorePointKind::Manual);
        assert_eq!(points[0].status, RestorePointStatus::Stable);

        let unhealthy = HealthMonitor::with_default_checks(context(true, false, ""));
        unhealthy
            .create_restore_point(RestorePointKind::Auto)
            .await
            .unwrap();
        assert_eq!(
            unhealthy.restore_points()[0].status,
            RestorePointStatus::Unstable
        );
    }

    #[tokio::test]
    async fn restore_to_point_roundtrips_workspace() {
        let ctx = context(true, true, "");
        let workspace = ctx.workspace.clone();
        workspace.record("/p/Home", "original");
        let monitor = HealthMonitor::with_default_checks(ctx);

        let id = monitor
            .create_restore_point(RestorePointKind::Manual)
            .await
            .unwrap();
        workspace.record("/p/Home", "mangled");

        assert!(monitor.restore_to_point(&id).await.unwrap());
        assert_eq!(workspace.get("/p/Home").as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn restore_to_unknown_point_is_not_found() {
        let monitor = HealthMonitor::with_default_checks(context(true, true, ""));
        let err = monitor.restore_to_point("restore-ghost").await.unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn restore_fails_when_post_restore_checks_fail() {
        let ctx = context(true, true, "");
        ctx.workspace.record("/p/Home", "content");
        // Passes during creation (one evaluation), fails on every later run.
        let monitor = HealthMonitor::new(ctx).with_check(Box::new(DecayingCheck {
            passes: 1,
            calls: AtomicUsize::new(0),
        }));

        let id = monitor
            .create_restore_point(RestorePointKind::Manual)
            .await
            .unwrap();
        assert_eq!(
            monitor.restore_points()[0].status,
            RestorePointStatus::Stable
        );
        assert!(!monitor.restore_to_point(&id).await.unwrap());
    }

    #[tokio::test]
    async fn hydrate_reloads_persisted_points() {
        let ctx = context(true, true, "");
        let snapshot = ctx.snapshot.clone();
        let monitor = HealthMonitor::with_default_checks(ctx);
        let id = monitor
            .create_restore_point(RestorePointKind::Auto)
            .await
            .unwrap();

        // A fresh monitor over the same snapshot store knows nothing until
        // hydrated.
        let fresh_ctx = CheckContext {
            snapshot,
            ..context(true, true, "")
        };
        let fresh = HealthMonitor::with_default_checks(fresh_ctx);
        assert!(fresh.restore_points().is_empty());
        assert_eq!(fresh.hydrate().await.unwrap(), 1);
        assert_eq!(fresh.restore_points()[0].id, id);
    }
}
