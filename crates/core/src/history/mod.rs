//! Version history access.
//!
//! The engine does not own version storage. Callers expose their version DAG
//! through [`VersionGraph`] and, for merge sessions, their content through
//! [`VersionStore`]. [`InMemoryVersionStore`] is a ready-made implementation
//! for tests and small embedders.

pub mod merge_base;

use std::collections::HashMap;

use crate::errors::HistoryError;

pub use merge_base::{MergeBaseCache, MergeBaseResolver};

/// Opaque version identifier.
pub type VersionId = String;

/// Read access to the parent links of the version DAG.
pub trait VersionGraph {
    /// Parents of `id`, empty for a root. Unknown ids fail with
    /// [`HistoryError::VersionNotFound`].
    fn version_parents(&self, id: &str) -> Result<Vec<VersionId>, HistoryError>;
}

/// A version graph that can also supply document content.
pub trait VersionStore: VersionGraph {
    fn version_content(&self, id: &str) -> Result<String, HistoryError>;
}

#[derive(Debug, Clone)]
struct StoredVersion {
    parents: Vec<VersionId>,
    content: String,
}

/// `HashMap`-backed version store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVersionStore {
    versions: HashMap<VersionId, StoredVersion>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a version. Parents are not checked here; a dangling
    /// parent surfaces as `VersionNotFound` during traversal.
    pub fn insert(
        &mut self,
        id: impl Into<VersionId>,
        parents: &[&str],
        content: impl Into<String>,
    ) -> &mut Self {
        self.versions.insert(
            id.into(),
            StoredVersion {
                parents: parents.iter().map(|p| p.to_string()).collect(),
                content: content.into(),
            },
        );
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.versions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl VersionGraph for InMemoryVersionStore {
    fn version_parents(&self, id: &str) -> Result<Vec<VersionId>, HistoryError> {
        self.versions
            .get(id)
            .map(|v| v.parents.clone())
            .ok_or_else(|| HistoryError::VersionNotFound(id.to_string()))
    }
}

impl VersionStore for InMemoryVersionStore {
    fn version_content(&self, id: &str) -> Result<String, HistoryError> {
        self.versions
            .get(id)
            .map(|v| v.content.clone())
            .ok_or_else(|| HistoryError::VersionNotFound(id.to_string()))
    }
}
