//! Typed errors for governance operations.
//!
//! Contention is deliberately not represented here: operations that lose a
//! lock race report it through their boolean return value so callers can
//! retry. Only missing records, unapproved content, storage failures, and
//! failed health checks rise to `GovernanceError`.

use thiserror::Error;

use crate::artifact::ArtifactKind;

/// Errors surfaced by governance operations.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Content at {kind}:{path} has no approval on record")]
    NotApproved { kind: ArtifactKind, path: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Health check '{name}' did not pass")]
    Check { name: String },
}

impl GovernanceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GovernanceError::NotFound { what: what.into() }
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        GovernanceError::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_approved_names_kind_and_path() {
        let err = GovernanceError::NotApproved {
            kind: ArtifactKind::Component,
            path: "/c/Button".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Content at component:/c/Button has no approval on record"
        );
    }

    #[test]
    fn not_found_carries_description() {
        let err = GovernanceError::not_found("backup backup:missing");
        match &err {
            GovernanceError::NotFound { what } => assert_eq!(what, "backup backup:missing"),
            _ => panic!("Expected NotFound"),
        }
        assert!(err.to_string().contains("backup:missing"));
    }

    #[test]
    fn storage_preserves_source() {
        let err = GovernanceError::storage(anyhow::anyhow!("disk offline"));
        assert!(err.to_string().contains("disk offline"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&GovernanceError::not_found("x"));
        assert_std_error(&GovernanceError::Check { name: "x".into() });
    }
}
