//! Artifact identity shared across the engine.
//!
//! Every governed artifact is addressed by a kind (page, component, style
//! sheet) and a path. The kind decides which side effects an operation
//! carries: component approvals feed the version history, page approvals
//! feed the content-route health check, and so on.

use serde::{Deserialize, Serialize};

/// The kind of a governed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A rendered page.
    Page,
    /// A reusable component; the only kind with version history.
    Component,
    /// A style sheet.
    Style,
}

impl ArtifactKind {
    /// All kinds, in the order app-level operations fan out.
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Page,
        ArtifactKind::Component,
        ArtifactKind::Style,
    ];

    /// Classify a path into an artifact kind.
    ///
    /// Paths under a `components/` (or `component/`) segment are components,
    /// paths under `styles/` or with a `.css` extension are style sheets,
    /// everything else is a page.
    pub fn classify(path: &str) -> ArtifactKind {
        if path.contains("/components/") || path.contains("/component/") {
            ArtifactKind::Component
        } else if path.contains("/styles/") || path.ends_with(".css") {
            ArtifactKind::Style
        } else {
            ArtifactKind::Page
        }
    }

    /// The lock/cache key for an artifact of this kind at `path`.
    pub fn scoped_key(&self, path: &str) -> String {
        format!("{}:{}", self, path)
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Page => write!(f, "page"),
            ArtifactKind::Component => write!(f, "component"),
            ArtifactKind::Style => write!(f, "style"),
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "page" => Ok(ArtifactKind::Page),
            "component" => Ok(ArtifactKind::Component),
            "style" => Ok(ArtifactKind::Style),
            _ => anyhow::bail!(
                "Invalid artifact kind '{}'. Valid values: page, component, style",
                s
            ),
        }
    }
}

/// A single artifact's path and content, as handed to multi-file operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub content: String,
}

impl ArtifactFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// The kind this file classifies as, by path.
    pub fn kind(&self) -> ArtifactKind {
        ArtifactKind::classify(&self.path)
    }
}
