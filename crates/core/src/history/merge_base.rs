//! Lowest common ancestor search over the version DAG.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::{debug, info, warn};

use super::{VersionGraph, VersionId};
use crate::errors::HistoryError;

/// Upper bound on versions in one octopus search (one bit per version).
pub const MAX_VERSIONS: usize = 64;

/// Stateless merge-base resolver.
///
/// Runs a level-synchronised breadth-first search from every start version
/// at once. Each visited node carries a bitmask of the start versions that
/// reach it; nodes whose mask is complete are common ancestors. The merge
/// bases are the common ancestors that are not ancestors of another one, so
/// uneven paths through merge commits cannot surface a stale base.
pub struct MergeBaseResolver;

impl MergeBaseResolver {
    /// Merge base of two versions. When several candidates tie, the first
    /// discovered wins.
    pub fn find_merge_base(
        source: &str,
        target: &str,
        graph: &dyn VersionGraph,
    ) -> Result<VersionId, HistoryError> {
        let versions = [source.to_string(), target.to_string()];
        let bases = Self::find_merge_bases(&versions, graph)?;
        bases
            .into_iter()
            .next()
            .ok_or_else(|| HistoryError::NoCommonAncestor {
                source_id: source.to_string(),
                target_id: target.to_string(),
            })
    }

    /// All nearest common ancestors of `versions`, in discovery order.
    pub fn find_merge_bases(
        versions: &[VersionId],
        graph: &dyn VersionGraph,
    ) -> Result<Vec<VersionId>, HistoryError> {
        if versions.len() > MAX_VERSIONS {
            return Err(HistoryError::TooManyVersions(versions.len()));
        }
        if versions.is_empty() {
            return Ok(Vec::new());
        }

        let full: u64 = if versions.len() == MAX_VERSIONS {
            u64::MAX
        } else {
            (1u64 << versions.len()) - 1
        };

        let mut marks: HashMap<VersionId, u64> = HashMap::new();
        let mut frontier: Vec<VersionId> = Vec::new();
        for (bit, id) in versions.iter().enumerate() {
            // Fail early on unknown start versions.
            graph.version_parents(id)?;
            let mark = marks.entry(id.clone()).or_insert(0);
            if *mark == 0 {
                frontier.push(id.clone());
            }
            *mark |= 1 << bit;
        }

        let mut common: Vec<VersionId> = frontier
            .iter()
            .filter(|id| marks.get(id.as_str()) == Some(&full))
            .cloned()
            .collect();
        let mut level = 0usize;
        while !frontier.is_empty() {
            let mut next: Vec<VersionId> = Vec::new();
            let mut queued: HashSet<VersionId> = HashSet::new();
            for id in &frontier {
                let mask = marks.get(id.as_str()).copied().unwrap_or(0);
                for parent in graph.version_parents(id)? {
                    let entry = marks.entry(parent.clone()).or_insert(0);
                    let merged = *entry | mask;
                    // Re-expand a node whenever it learns a new bit.
                    if merged != *entry {
                        *entry = merged;
                        if merged == full {
                            common.push(parent.clone());
                        }
                        if queued.insert(parent.clone()) {
                            next.push(parent);
                        }
                    }
                }
            }

            level += 1;
            debug!(level, frontier = next.len(), "merge-base search level");
            frontier = next;
        }

        if common.is_empty() {
            let source_id = versions[0].clone();
            let target_id = versions[1..].join(",");
            warn!(%source_id, %target_id, "versions share no common ancestor");
            return Err(HistoryError::NoCommonAncestor {
                source_id,
                target_id,
            });
        }

        // Drop common ancestors reachable from another common ancestor.
        let mut below: HashSet<VersionId> = HashSet::new();
        for id in &common {
            let mut stack = graph.version_parents(id)?;
            while let Some(node) = stack.pop() {
                if below.insert(node.clone()) {
                    stack.extend(graph.version_parents(&node)?);
                }
            }
        }
        let bases: Vec<VersionId> = common
            .into_iter()
            .filter(|id| !below.contains(id))
            .collect();
        info!(levels = level, bases = ?bases, "merge base found");
        Ok(bases)
    }
}

/// Caller-owned merge-base cache.
///
/// Entries are keyed by `(source, target, graph_version)`, where
/// `graph_version` is any counter the caller bumps when the DAG changes. The
/// cache never expires entries on its own; call
/// [`invalidate`](Self::invalidate) or use a new graph version.
#[derive(Debug, Default)]
pub struct MergeBaseCache {
    entries: RwLock<HashMap<(VersionId, VersionId, u64), VersionId>>,
}

impl MergeBaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached merge base, resolving and storing it on a miss. Errors are not
    /// cached.
    pub fn get_or_resolve(
        &self,
        source: &str,
        target: &str,
        graph_version: u64,
        graph: &dyn VersionGraph,
    ) -> Result<VersionId, HistoryError> {
        let key = (source.to_string(), target.to_string(), graph_version);

        match self.entries.read() {
            Ok(entries) => {
                if let Some(base) = entries.get(&key) {
                    debug!(source, target, graph_version, "merge base cache hit");
                    return Ok(base.clone());
                }
            }
            Err(_) => warn!("merge base cache lock poisoned, bypassing cache"),
        }

        let base = MergeBaseResolver::find_merge_base(source, target, graph)?;
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, base.clone());
        }
        Ok(base)
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Drop entries computed against graph versions older than `current`.
    pub fn retain_graph_version(&self, current: u64) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|(_, _, version), _| *version >= current);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
