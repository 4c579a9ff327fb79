//! Merge workflow over stored versions.
//!
//! A [`MergeSession`] resolves the merge base, loads the three versions,
//! runs the merge and then holds the outcome while conflicts are resolved
//! one at a time. Failures are scoped to the conflict they concern; the
//! session stays usable until it is finalized.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditEventType};
use crate::conflict::{MergeLabels, MergeResult, MergeStrategy, PartialMerge};
use crate::engine::MergeEngine;
use crate::errors::{EngineError, MergeError, ResolutionError};
use crate::history::{MergeBaseResolver, VersionId, VersionStore};
use crate::models::{ConflictResolution, MergeConflict, ResolutionStrategy};

/// Where a session stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The merge had no conflicts (or they were forced).
    Clean,
    /// At least one conflict is unresolved.
    AwaitingResolution,
    /// Every conflict is resolved; `finalize` will succeed.
    ReadyToFinalize,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::AwaitingResolution => write!(f, "awaiting_resolution"),
            Self::ReadyToFinalize => write!(f, "ready_to_finalize"),
        }
    }
}

/// The final product of a merge session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergedDocument {
    pub content: String,
    pub base_id: VersionId,
    pub source_id: VersionId,
    pub target_id: VersionId,
    pub strategy: MergeStrategy,
    /// Every conflict of the merge with its resolution (or, for a forced
    /// merge, unresolved and overridden by the source side).
    pub conflicts: Vec<MergeConflict>,
}

enum Outcome {
    Clean {
        content: String,
        forced: Vec<MergeConflict>,
    },
    Conflicted {
        conflicts: Vec<MergeConflict>,
        partial: PartialMerge,
    },
}

/// An in-progress merge of two stored versions.
pub struct MergeSession<'e> {
    engine: &'e MergeEngine,
    base_id: VersionId,
    source_id: VersionId,
    target_id: VersionId,
    strategy: MergeStrategy,
    outcome: Outcome,
}

impl<'e> MergeSession<'e> {
    /// Load and merge `source_id` and `target_id`.
    ///
    /// When `base_id` is `None` the merge base is resolved through the
    /// store's version graph. A failed merge is returned as the error.
    pub fn open<S: VersionStore>(
        engine: &'e MergeEngine,
        store: &S,
        source_id: &str,
        target_id: &str,
        base_id: Option<&str>,
        strategy: MergeStrategy,
    ) -> Result<Self, EngineError> {
        let base_id = match base_id {
            Some(id) => id.to_string(),
            None => MergeBaseResolver::find_merge_base(source_id, target_id, store)?,
        };
        info!(%base_id, source_id, target_id, %strategy, "opening merge session");

        let base = store.version_content(&base_id)?;
        let source = store.version_content(source_id)?;
        let target = store.version_content(target_id)?;

        let labels = MergeLabels::new(&base_id, source_id, target_id);
        let outcome = match engine
            .merger()
            .merge_labeled(&labels, &base, &source, &target, strategy)
        {
            MergeResult::Success {
                merged_content,
                forced_conflicts,
                ..
            } => Outcome::Clean {
                content: merged_content,
                forced: forced_conflicts,
            },
            MergeResult::WithConflicts {
                conflicts,
                partial_merge,
                ..
            } => Outcome::Conflicted {
                conflicts,
                partial: partial_merge,
            },
            MergeResult::Failed { error, cause } => {
                warn!(%error, cause = %cause, "merge session could not be opened");
                return Err(error);
            }
        };

        Ok(Self {
            engine,
            base_id,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            strategy,
            outcome,
        })
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    pub fn status(&self) -> SessionStatus {
        match &self.outcome {
            Outcome::Clean { .. } => SessionStatus::Clean,
            Outcome::Conflicted { conflicts, .. } if conflicts.iter().all(|c| c.is_resolved()) => {
                SessionStatus::ReadyToFinalize
            }
            Outcome::Conflicted { .. } => SessionStatus::AwaitingResolution,
        }
    }

    /// All conflicts of the merge, resolved or not.
    pub fn conflicts(&self) -> &[MergeConflict] {
        match &self.outcome {
            Outcome::Clean { forced, .. } => forced,
            Outcome::Conflicted { conflicts, .. } => conflicts,
        }
    }

    /// Conflicts still waiting for a resolution.
    pub fn pending(&self) -> Vec<&MergeConflict> {
        match &self.outcome {
            Outcome::Clean { .. } => Vec::new(),
            Outcome::Conflicted { conflicts, .. } => {
                conflicts.iter().filter(|c| !c.is_resolved()).collect()
            }
        }
    }

    fn conflict_mut(&mut self, conflict_id: &str) -> Result<&mut MergeConflict, ResolutionError> {
        match &mut self.outcome {
            Outcome::Conflicted { conflicts, .. } => conflicts.iter_mut().find(|c| c.id == conflict_id),
            Outcome::Clean { .. } => None,
        }
        .ok_or_else(|| ResolutionError::NotFound(conflict_id.to_string()))
    }

    /// Resolve one conflict. Errors concern that conflict only.
    pub fn resolve(
        &mut self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
        user_input: &BTreeMap<String, String>,
    ) -> Result<(), ResolutionError> {
        let engine = self.engine;
        let resolver = engine.resolver();
        let conflict = self.conflict_mut(conflict_id)?;
        resolver.apply(conflict, strategy, user_input)
    }

    /// Apply the suggested strategy to every pending conflict. Returns the
    /// conflicts that could not be resolved automatically, with the reason.
    pub fn auto_resolve_all(&mut self) -> Vec<(String, ResolutionError)> {
        let engine = self.engine;
        let resolver = engine.resolver();
        let Outcome::Conflicted { conflicts, .. } = &mut self.outcome else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        for conflict in conflicts.iter_mut().filter(|c| !c.is_resolved()) {
            if let Err(e) = resolver.auto_resolve(conflict) {
                failures.push((conflict.id.clone(), e));
            }
        }
        debug!(unresolved = failures.len(), "automatic resolution pass complete");
        failures
    }

    /// Withdraw the resolution of one conflict.
    pub fn reopen(
        &mut self,
        conflict_id: &str,
        reason: &str,
    ) -> Result<ConflictResolution, ResolutionError> {
        let engine = self.engine;
        let resolver = engine.resolver();
        let conflict = self.conflict_mut(conflict_id)?;
        resolver.reopen(conflict, reason)
    }

    /// The current state of the document with conflict markers around every
    /// conflict region.
    pub fn preview(&self) -> Result<String, MergeError> {
        match &self.outcome {
            Outcome::Clean { content, .. } => Ok(content.clone()),
            Outcome::Conflicted { conflicts, partial } => partial.render_with_markers(conflicts),
        }
    }

    /// Assemble the merged document. Fails with
    /// [`MergeError::UnresolvedConflicts`] while any conflict is open; the
    /// session is left intact so resolution can continue.
    pub fn finalize(&self) -> Result<MergedDocument, EngineError> {
        let started = Instant::now();
        let (content, conflicts) = match &self.outcome {
            Outcome::Clean { content, forced } => (content.clone(), forced.clone()),
            Outcome::Conflicted { conflicts, partial } => (
                self.engine.merger().assemble(partial, conflicts)?,
                conflicts.clone(),
            ),
        };

        self.engine.audit().emit(
            AuditEvent::new(AuditEventType::MergePerformed)
                .with("phase", "finalized")
                .with("base_version", self.base_id.clone())
                .with("source_version", self.source_id.clone())
                .with("target_version", self.target_id.clone())
                .with("strategy", self.strategy.to_string())
                .with("conflict_count", conflicts.len())
                .with(
                    "reopened",
                    conflicts.iter().map(|c| c.reopen_count).sum::<u32>(),
                )
                .with_duration(started.elapsed()),
        );
        info!(
            base = %self.base_id,
            source = %self.source_id,
            target = %self.target_id,
            conflicts = conflicts.len(),
            "merge session finalized"
        );

        Ok(MergedDocument {
            content,
            base_id: self.base_id.clone(),
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            strategy: self.strategy,
            conflicts,
        })
    }
}
