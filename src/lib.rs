pub mod artifact;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod hash;
pub mod health;
pub mod history;
pub mod ledger;
pub mod locks;
pub mod orchestrator;
pub mod probes;
pub mod snapshot;
pub mod store;
pub mod workspace;

pub use artifact::{ArtifactFile, ArtifactKind};
pub use dispatcher::{Command, CommandOutcome, CommandTarget, CommandVerb};
pub use engine::Engine;
pub use errors::{GovernanceError, Result};
pub use orchestrator::PhaseConfig;
