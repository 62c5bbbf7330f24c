//! Composition root wiring the governance services together.
//!
//! Every service is constructed here and shared by `Arc`; nothing in the
//! crate reaches for process globals. The engine also owns the background
//! timers (backup pruning, automatic restore points) behind explicit
//! start/stop lifecycle calls.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::artifact::{ArtifactFile, ArtifactKind};
use crate::cache::ChangeCache;
use crate::config::EngineConfig;
use crate::dispatcher::{Command, CommandOutcome, Dispatcher};
use crate::errors::Result;
use crate::health::checks::CheckContext;
use crate::health::{CheckReport, HealthMonitor, RestorePointKind};
use crate::history::VersionHistory;
use crate::ledger::ApprovalLedger;
use crate::locks::LockRegistry;
use crate::orchestrator::{PhaseConfig, PhaseOrchestrator};
use crate::probes::{HttpProbe, KvStoreProbe, ReqwestProbe};
use crate::snapshot::SnapshotStore;
use crate::snapshot::hooks::GzipHook;
use crate::store::{KeyValueStore, MemoryStore};
use crate::workspace::Workspace;

struct BackgroundTask {
    name: &'static str,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Engine {
    config: EngineConfig,
    locks: Arc<LockRegistry>,
    cache: Arc<ChangeCache>,
    history: Arc<VersionHistory>,
    workspace: Arc<Workspace>,
    ledger: Arc<ApprovalLedger>,
    snapshot: Arc<SnapshotStore>,
    orchestrator: Arc<PhaseOrchestrator>,
    health: Arc<HealthMonitor>,
    dispatcher: Arc<Dispatcher>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl Engine {
    /// Wire up the full service graph over the given store and HTTP probe.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn KeyValueStore>,
        http_probe: Arc<dyn HttpProbe>,
    ) -> Self {
        let locks = Arc::new(LockRegistry::new(config.locks.settings()));
        let cache = Arc::new(ChangeCache::new(Duration::from_secs(config.cache.ttl_secs)));
        let history = Arc::new(VersionHistory::new(config.history.max_versions));
        let workspace = Arc::new(Workspace::new());

        let snapshot = Arc::new(
            SnapshotStore::new(
                store.clone(),
                locks.clone(),
                cache.clone(),
                history.clone(),
                workspace.clone(),
                config.snapshot.clone(),
            )
            .with_hook(Arc::new(GzipHook)),
        );
        let ledger = Arc::new(ApprovalLedger::new(
            locks.clone(),
            cache.clone(),
            history.clone(),
            workspace.clone(),
        ));
        let orchestrator = Arc::new(PhaseOrchestrator::new(
            snapshot.clone(),
            ledger.clone(),
            workspace.clone(),
        ));
        let health = Arc::new(HealthMonitor::with_default_checks(CheckContext {
            ledger: ledger.clone(),
            snapshot: snapshot.clone(),
            workspace: workspace.clone(),
            store_probe: Arc::new(KvStoreProbe::new(store)),
            http_probe,
            base_url: config.health.content_base_url.clone(),
        }));
        let dispatcher = Arc::new(
            Dispatcher::new(ledger.clone(), history.clone())
                .with_max_log(config.dispatcher.max_command_log),
        );

        Self {
            config,
            locks,
            cache,
            history,
            workspace,
            ledger,
            snapshot,
            orchestrator,
            health,
            dispatcher,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Default configuration over an in-memory store. The usual starting
    /// point for tests and embedding.
    pub fn in_memory() -> Self {
        Self::new(
            EngineConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ReqwestProbe::with_defaults()),
        )
    }

    /// Reload state persisted by earlier runs: snapshot configuration,
    /// restore points, and the current-phase pointer.
    pub async fn hydrate(&self) -> Result<()> {
        if self.snapshot.load_persisted_config().await? {
            info!("Loaded persisted snapshot configuration");
        }
        let points = self.health.hydrate().await?;
        if points > 0 {
            info!(points, "Loaded persisted restore points");
        }
        self.orchestrator.hydrate().await?;
        Ok(())
    }

    /// Start the periodic backup pruner and the automatic restore-point
    /// scheduler. Idempotent: a second call while running is a no-op.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks_guard();
        if !tasks.is_empty() {
            warn!("Background tasks already running");
            return;
        }

        let prune_period = Duration::from_secs(self.snapshot.config().backup_interval_secs.max(1));
        let snapshot = self.snapshot.clone();
        tasks.push(spawn_interval_task("backup-pruner", prune_period, move || {
            let snapshot = snapshot.clone();
            async move {
                if let Err(err) = snapshot.prune_old_backups().await {
                    warn!(error = %err, "Scheduled backup pruning failed");
                }
            }
        }));

        let point_period =
            Duration::from_secs(self.config.health.restore_point_interval_secs.max(1));
        let health = self.health.clone();
        tasks.push(spawn_interval_task(
            "restore-point-scheduler",
            point_period,
            move || {
                let health = health.clone();
                async move {
                    if let Err(err) = health.create_restore_point(RestorePointKind::Auto).await {
                        warn!(error = %err, "Scheduled restore point failed");
                    }
                }
            },
        ));
        info!("Background tasks started");
    }

    /// Signal every background task and wait for it to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<BackgroundTask> = {
            let mut tasks = self.tasks_guard();
            tasks.drain(..).collect()
        };
        for task in drained {
            let _ = task.shutdown.send(());
            if let Err(err) = task.handle.await {
                warn!(task = task.name, error = %err, "Background task panicked");
            } else {
                info!(task = task.name, "Background task stopped");
            }
        }
    }

    pub async fn execute(&self, command: Command) -> CommandOutcome {
        self.dispatcher.execute(command).await
    }

    pub async fn approve(&self, kind: ArtifactKind, path: &str, content: &str) -> bool {
        self.ledger.approve(kind, path, content).await
    }

    pub async fn complete_phase(&self, files: &[ArtifactFile], phase: &PhaseConfig) -> bool {
        self.orchestrator.complete_phase(files, phase).await
    }

    pub async fn restore_phase(&self, id: &str) -> bool {
        self.orchestrator.restore_phase(id).await
    }

    pub async fn run_health_checks(&self) -> CheckReport {
        self.health.run_checks().await
    }

    pub async fn create_restore_point(&self, kind: RestorePointKind) -> Result<String> {
        self.health.create_restore_point(kind).await
    }

    pub async fn restore_to_point(&self, id: &str) -> Result<bool> {
        self.health.restore_to_point(id).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn cache(&self) -> &Arc<ChangeCache> {
        &self.cache
    }

    pub fn history(&self) -> &Arc<VersionHistory> {
        &self.history
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn ledger(&self) -> &Arc<ApprovalLedger> {
        &self.ledger
    }

    pub fn snapshot(&self) -> &Arc<SnapshotStore> {
        &self.snapshot
    }

    pub fn orchestrator(&self) -> &Arc<PhaseOrchestrator> {
        &self.orchestrator
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn tasks_guard(&self) -> MutexGuard<'_, Vec<BackgroundTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Spawn a loop that runs `tick` every `period` until the returned task's
/// shutdown channel fires. The first tick happens one full period after
/// start, not immediately.
fn spawn_interval_task<F, Fut>(name: &'static str, period: Duration, tick: F) -> BackgroundTask
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = &mut shutdown_rx => break,
            }
        }
    });
    BackgroundTask {
        name,
        shutdown: shutdown_tx,
        handle,
    }
}
