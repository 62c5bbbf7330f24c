//! Current content of every governed artifact.
//!
//! The ledger and the restore flows both need "what does the tree look like
//! right now". Approvals record it file by file; automatic restore points
//! snapshot it wholesale. Paths are kept sorted so snapshots are
//! deterministic.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::artifact::ArtifactFile;

#[derive(Default)]
pub struct Workspace {
    files: RwLock<BTreeMap<String, String>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `content` as the current state of `path`.
    pub fn record(&self, path: &str, content: &str) {
        self.write_guard()
            .insert(path.to_string(), content.to_string());
    }

    pub fn record_all(&self, files: &[ArtifactFile]) {
        let mut guard = self.write_guard();
        for file in files {
            guard.insert(file.path.clone(), file.content.clone());
        }
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.read_guard().get(path).cloned()
    }

    /// Every governed file, sorted by path.
    pub fn snapshot(&self) -> Vec<ArtifactFile> {
        self.read_guard()
            .iter()
            .map(|(path, content)| ArtifactFile::new(path.clone(), content.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_guard().is_empty()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.files
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.files
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
