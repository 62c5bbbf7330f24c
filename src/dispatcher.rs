//! Uniform command entry point over the governance services.
//!
//! Callers hand in a [`Command`] and always get a [`CommandOutcome`] back:
//! errors raised by the underlying operations are normalized into
//! `{success: false, message}` rather than propagated. Every invocation is
//! appended to a bounded in-memory log used only for diagnostics.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::artifact::ArtifactKind;
use crate::errors::Result;
use crate::history::VersionHistory;
use crate::ledger::ApprovalLedger;

const DEFAULT_MAX_LOG: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandVerb {
    Approve,
    Lock,
    Status,
    Rollback,
}

impl std::fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandVerb::Approve => write!(f, "approve"),
            CommandVerb::Lock => write!(f, "lock"),
            CommandVerb::Status => write!(f, "status"),
            CommandVerb::Rollback => write!(f, "rollback"),
        }
    }
}

/// What a command addresses. `App` fans out across every artifact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandTarget {
    App,
    Page,
    Component,
    Style,
}

impl CommandTarget {
    /// The single artifact kind this target maps to, if any.
    fn kind(self) -> Option<ArtifactKind> {
        match self {
            CommandTarget::App => None,
            CommandTarget::Page => Some(ArtifactKind::Page),
            CommandTarget::Component => Some(ArtifactKind::Component),
            CommandTarget::Style => Some(ArtifactKind::Style),
        }
    }
}

impl std::fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandTarget::App => write!(f, "app"),
            CommandTarget::Page => write!(f, "page"),
            CommandTarget::Component => write!(f, "component"),
            CommandTarget::Style => write!(f, "style"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub verb: CommandVerb,
    pub target: CommandTarget,
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
}

impl Command {
    pub fn approve(target: CommandTarget, path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            verb: CommandVerb::Approve,
            target,
            path: path.into(),
            content: Some(content.into()),
            version: None,
        }
    }

    pub fn lock(target: CommandTarget, path: impl Into<String>) -> Self {
        Self {
            verb: CommandVerb::Lock,
            target,
            path: path.into(),
            content: None,
            version: None,
        }
    }

    pub fn status(target: CommandTarget, path: impl Into<String>) -> Self {
        Self {
            verb: CommandVerb::Status,
            target,
            path: path.into(),
            content: None,
            version: None,
        }
    }

    pub fn rollback(target: CommandTarget, path: impl Into<String>, version: Option<u32>) -> Self {
        Self {
            verb: CommandVerb::Rollback,
            target,
            path: path.into(),
            content: None,
            version,
        }
    }
}

/// Uniform result shape for every command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// One diagnostic log entry per dispatched command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub timestamp: DateTime<Utc>,
    pub verb: CommandVerb,
    pub target: CommandTarget,
    pub path: String,
    pub success: bool,
}

pub struct Dispatcher {
    ledger: Arc<ApprovalLedger>,
    history: Arc<VersionHistory>,
    max_log: usize,
    log: Mutex<VecDeque<CommandRecord>>,
}

impl Dispatcher {
    pub fn new(ledger: Arc<ApprovalLedger>, history: Arc<VersionHistory>) -> Self {
        Self {
            ledger,
            history,
            max_log: DEFAULT_MAX_LOG,
            log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_max_log(mut self, max_log: usize) -> Self {
        self.max_log = max_log;
        self
    }

    /// Dispatch a command. Never errors and never panics: failures of any
    /// kind come back as `success: false` with a summarizing message.
    pub async fn execute(&self, command: Command) -> CommandOutcome {
        let outcome = match self.run(&command).await {
            Ok(outcome) => outcome,
            Err(err) => CommandOutcome::fail(err.to_string()),
        };
        self.record(&command, outcome.success);
        if outcome.success {
            info!(verb = %command.verb, target = %command.target, path = %command.path, "Command succeeded");
        } else {
            warn!(verb = %command.verb, target = %command.target, path = %command.path, message = %outcome.message, "Command failed");
        }
        outcome
    }

    async fn run(&self, command: &Command) -> Result<CommandOutcome> {
        match command.verb {
            CommandVerb::Approve => self.run_approve(command).await,
            CommandVerb::Lock => self.run_lock(command),
            CommandVerb::Status => Ok(self.run_status(command)),
            CommandVerb::Rollback => Ok(self.run_rollback(command)),
        }
    }

    async fn run_approve(&self, command: &Command) -> Result<CommandOutcome> {
        let Some(content) = command.content.as_deref() else {
            return Ok(CommandOutcome::fail("Approve requires content"));
        };

        match command.target.kind() {
            Some(kind) => {
                if !self.ledger.approve(kind, &command.path, content).await {
                    return Ok(CommandOutcome::fail(format!(
                        "Could not approve {kind}:{path} (artifact locked)",
                        path = command.path
                    )));
                }
                let data = self
                    .ledger
                    .status(kind, &command.path)
                    .and_then(|record| serde_json::to_value(record).ok());
                Ok(CommandOutcome {
                    success: true,
                    message: format!("Approved {kind}:{path}", path = command.path),
                    data,
                })
            }
            None => {
                // App approval fans out over every kind and succeeds only if
                // all of them do.
                let results = join_all(
                    ArtifactKind::ALL
                        .iter()
                        .map(|kind| self.ledger.approve(*kind, &command.path, content)),
                )
                .await;
                if results.iter().all(|approved| *approved) {
                    Ok(CommandOutcome::ok(format!(
                        "Approved app content at {}",
                        command.path
                    )))
                } else {
                    let failed: Vec<String> = ArtifactKind::ALL
                        .iter()
                        .zip(&results)
                        .filter(|(_, approved)| !**approved)
                        .map(|(kind, _)| kind.to_string())
                        .collect();
                    Ok(CommandOutcome::fail(format!(
                        "App approval incomplete at {}: {} failed",
                        command.path,
                        failed.join(", ")
                    )))
                }
            }
        }
    }

    fn run_lock(&self, command: &Command) -> Result<CommandOutcome> {
        let Some(kind) = command.target.kind() else {
            return Ok(CommandOutcome::fail(
                "Lock applies to a single artifact kind, not app",
            ));
        };
        if self.ledger.lock_approved_content(kind, &command.path)? {
            Ok(CommandOutcome::ok(format!(
                "Locked {kind}:{path}",
                path = command.path
            )))
        } else {
            Ok(CommandOutcome::fail(format!(
                "{kind}:{path} is already locked",
                path = command.path
            )))
        }
    }

    fn run_status(&self, command: &Command) -> CommandOutcome {
        match command.target.kind() {
            Some(kind) => match self.ledger.status(kind, &command.path) {
                Some(record) => CommandOutcome::ok_with(
                    format!("Approval status for {kind}:{path}", path = command.path),
                    serde_json::to_value(&record).unwrap_or(Value::Null),
                ),
                None => CommandOutcome::fail(format!(
                    "No approval record for {kind}:{path}",
                    path = command.path
                )),
            },
            None => {
                // Aggregate view: success regardless of which records exist.
                let mut data = serde_json::Map::new();
                for kind in ArtifactKind::ALL {
                    let record = self
                        .ledger
                        .status(kind, &command.path)
                        .and_then(|r| serde_json::to_value(r).ok())
                        .unwrap_or(Value::Null);
                    data.insert(kind.to_string(), record);
                }
                CommandOutcome::ok_with(
                    format!("Approval status for app content at {}", command.path),
                    Value::Object(data),
                )
            }
        }
    }

    fn run_rollback(&self, command: &Command) -> CommandOutcome {
        match command.target {
            CommandTarget::Component => {
                match self.history.rollback(&command.path, command.version) {
                    Some(state) => CommandOutcome::ok_with(
                        format!(
                            "Rolled back {} to version {}",
                            command.path, state.version
                        ),
                        serde_json::to_value(&state).unwrap_or(Value::Null),
                    ),
                    None => match command.version {
                        Some(version) => CommandOutcome::fail(format!(
                            "Version {version} not found for {}",
                            command.path
                        )),
                        None => CommandOutcome::fail(format!(
                            "No prior version to roll back to for {}",
                            command.path
                        )),
                    },
                }
            }
            _ => CommandOutcome::fail("Version history tracks components only"),
        }
    }

    fn record(&self, command: &Command, success: bool) {
        let mut log = self.log_guard();
        log.push_back(CommandRecord {
            timestamp: Utc::now(),
            verb: command.verb,
            target: command.target,
            path: command.path.clone(),
            success,
        });
        while log.len() > self.max_log {
            log.pop_front();
        }
    }

    /// Diagnostic command log, oldest first. Never persisted.
    pub fn command_log(&self) -> Vec<CommandRecord> {
        self.log_guard().iter().cloned().collect()
    }

    fn log_guard(&self) -> MutexGuard<'_, VecDeque<CommandRecord>> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
