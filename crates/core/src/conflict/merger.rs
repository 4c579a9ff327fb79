//! Three-way merge engine.
//!
//! Diffs base→source and base→target with the Myers engine, hands both
//! scripts to the [`ConflictDetector`], and either applies every change to a
//! copy of the base or returns a partial merge that keeps each conflict
//! range verbatim from the base.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::detector::{same_edit, ConflictDetector};
use crate::audit::{AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::config::EngineConfig;
use crate::diff::{apply_changes, MyersDiffEngine, Tokenizer};
use crate::errors::{EngineError, MergeError};
use crate::models::{DiffChange, Granularity, MergeConflict, TextDiff};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How conflicts are handled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Merge both sides, stop on conflicts.
    #[default]
    Recursive,
    /// Merge both sides, take the source side of every conflict.
    Force,
    /// Take the source content as is.
    Ours,
    /// Take the target content as is.
    Theirs,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recursive => write!(f, "recursive"),
            Self::Force => write!(f, "force"),
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// Version ids (or any display names) attached to a merge for audit and
/// conflict markers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeLabels {
    pub base: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
}

impl MergeLabels {
    pub fn new(base: &str, source: &str, target: &str) -> Self {
        Self {
            base: Some(base.to_string()),
            source: Some(source.to_string()),
            target: Some(target.to_string()),
        }
    }
}

/// Where a conflict's placeholder sits inside [`PartialMerge::lines`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictRegion {
    pub conflict_id: String,
    /// Half-open token range in the partial merge.
    pub start: usize,
    pub end: usize,
}

/// A merge with every non-conflicting change applied and every conflict
/// range left as in the base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartialMerge {
    pub lines: Vec<String>,
    /// Ordered by position, non-overlapping.
    pub regions: Vec<ConflictRegion>,
    pub granularity: Granularity,
    /// Whether the assembled text ends with a newline (line granularity).
    pub trailing_newline: bool,
    #[serde(default)]
    pub labels: MergeLabels,
}

impl PartialMerge {
    fn finish(&self, tokens: &[String]) -> String {
        finish(tokens, self.granularity, self.trailing_newline)
    }

    /// The partial merge as text, base content in every conflict region.
    pub fn content(&self) -> String {
        self.finish(&self.lines)
    }

    /// Render with git-style conflict markers around each region:
    ///
    /// ```text
    /// <<<<<<< source
    /// ...
    /// ||||||| base
    /// ...
    /// =======
    /// ...
    /// >>>>>>> target
    /// ```
    pub fn render_with_markers(&self, conflicts: &[MergeConflict]) -> Result<String, MergeError> {
        let label = |name: &Option<String>, default: &str| -> String {
            name.clone().unwrap_or_else(|| default.to_string())
        };
        let source = label(&self.labels.source, "source");
        let base = label(&self.labels.base, "base");
        let target = label(&self.labels.target, "target");

        let mut out = String::new();
        let mut cursor = 0;
        for region in &self.regions {
            let conflict = find_conflict(conflicts, &region.conflict_id)?;
            out.push_str(&self.granularity.join(&self.lines[cursor..region.start]));
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }

            let mut block = |marker: String, texts: Option<&[String]>| {
                out.push_str(&marker);
                out.push('\n');
                if let Some(texts) = texts.filter(|t| !t.is_empty()) {
                    out.push_str(&self.granularity.join(texts));
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            };
            block(format!("<<<<<<< {source}"), Some(conflict.source_content.as_slice()));
            block(format!("||||||| {base}"), Some(conflict.base_content.as_slice()));
            block("=======".to_string(), Some(conflict.target_content.as_slice()));
            block(format!(">>>>>>> {target}"), None);

            cursor = region.end;
        }

        let rest = &self.lines[cursor..];
        if rest.is_empty() {
            if self.regions.is_empty() {
                return Ok(self.content());
            }
            return Ok(out);
        }
        out.push_str(&self.finish(rest));
        Ok(out)
    }
}

/// Outcome of a merge call. Matched exhaustively by callers.
#[derive(Debug)]
pub enum MergeResult {
    Success {
        merged_content: String,
        /// Changes applied to the base. Zero when a fast path returned one
        /// side unchanged.
        applied_changes: usize,
        strategy: MergeStrategy,
        /// Conflicts overridden by a `Force` merge; empty otherwise.
        forced_conflicts: Vec<MergeConflict>,
    },
    WithConflicts {
        conflicts: Vec<MergeConflict>,
        partial_merge: PartialMerge,
        resolution_required: bool,
    },
    Failed {
        error: EngineError,
        cause: String,
    },
}

impl MergeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The merged text of a successful merge.
    pub fn merged_content(&self) -> Option<&str> {
        match self {
            Self::Success { merged_content, .. } => Some(merged_content),
            _ => None,
        }
    }

    /// Open conflicts, or the overridden ones of a forced merge.
    pub fn conflicts(&self) -> &[MergeConflict] {
        match self {
            Self::Success {
                forced_conflicts, ..
            } => forced_conflicts,
            Self::WithConflicts { conflicts, .. } => conflicts,
            Self::Failed { .. } => &[],
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::WithConflicts { .. } => "conflicts",
            Self::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// Three-way merge engine. Holds configuration and the audit sink only.
pub struct ThreeWayMerger {
    engine: MyersDiffEngine,
    detector: ConflictDetector,
    audit: Arc<dyn AuditSink>,
}

impl Default for ThreeWayMerger {
    fn default() -> Self {
        Self::new(&EngineConfig::default(), Arc::new(NullAuditSink))
    }
}

impl ThreeWayMerger {
    pub fn new(config: &EngineConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            engine: MyersDiffEngine::new(&config.diff, audit.clone()),
            detector: ConflictDetector::new(config.conflict.clone()),
            audit,
        }
    }

    pub fn engine(&self) -> &MyersDiffEngine {
        &self.engine
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Merge `source` and `target`, two descendants of `base`.
    pub fn merge(
        &self,
        base: &str,
        source: &str,
        target: &str,
        strategy: MergeStrategy,
    ) -> MergeResult {
        self.merge_labeled(&MergeLabels::default(), base, source, target, strategy)
    }

    /// [`merge`](Self::merge) with version labels for audit and markers.
    ///
    /// Emits exactly one `MERGE_PERFORMED` event, preceded by a
    /// `CONFLICT_DETECTED` event when conflicts were found.
    pub fn merge_labeled(
        &self,
        labels: &MergeLabels,
        base: &str,
        source: &str,
        target: &str,
        strategy: MergeStrategy,
    ) -> MergeResult {
        let started = Instant::now();
        info!(
            base = ?labels.base,
            source = ?labels.source,
            target = ?labels.target,
            %strategy,
            "performing three-way merge"
        );

        let result = match strategy {
            MergeStrategy::Ours => MergeResult::Success {
                merged_content: source.to_string(),
                applied_changes: 0,
                strategy,
                forced_conflicts: Vec::new(),
            },
            MergeStrategy::Theirs => MergeResult::Success {
                merged_content: target.to_string(),
                applied_changes: 0,
                strategy,
                forced_conflicts: Vec::new(),
            },
            MergeStrategy::Recursive | MergeStrategy::Force => {
                self.merge_contents(labels, base, source, target, strategy)
            }
        };

        let conflicts = result.conflicts();
        if !conflicts.is_empty() {
            let ids: Vec<&str> = conflicts.iter().map(|c| c.id.as_str()).collect();
            let max_severity = conflicts.iter().map(|c| c.severity).max();
            self.audit.emit(
                AuditEvent::new(AuditEventType::ConflictDetected)
                    .with_opt("source_version", labels.source.clone())
                    .with_opt("target_version", labels.target.clone())
                    .with("conflict_count", conflicts.len())
                    .with("conflict_ids", ids)
                    .with_opt("max_severity", max_severity.map(|s| s.to_string()))
                    .with("forced", strategy == MergeStrategy::Force),
            );
        }

        let mut event = AuditEvent::new(AuditEventType::MergePerformed)
            .with_opt("base_version", labels.base.clone())
            .with_opt("source_version", labels.source.clone())
            .with_opt("target_version", labels.target.clone())
            .with("strategy", strategy.to_string())
            .with("outcome", result.outcome())
            .with("conflict_count", conflicts.len())
            .with("base_lines", base.lines().count())
            .with("source_lines", source.lines().count())
            .with("target_lines", target.lines().count())
            .with_duration(started.elapsed());
        match &result {
            MergeResult::Success {
                applied_changes, ..
            } => event = event.with("applied_changes", *applied_changes),
            MergeResult::Failed { error, cause } => {
                event = event.with("error", error.to_string()).with("cause", cause.clone())
            }
            MergeResult::WithConflicts { .. } => {}
        }
        self.audit.emit(event);

        info!(
            outcome = result.outcome(),
            conflicts = result.conflicts().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "merge complete"
        );
        result
    }

    fn merge_contents(
        &self,
        labels: &MergeLabels,
        base: &str,
        source: &str,
        target: &str,
        strategy: MergeStrategy,
    ) -> MergeResult {
        let success = |content: &str| MergeResult::Success {
            merged_content: content.to_string(),
            applied_changes: 0,
            strategy,
            forced_conflicts: Vec::new(),
        };

        // Fast paths: if either side is identical to base, the other side wins cleanly.
        if source == base {
            debug!("source == base, target wins cleanly");
            return success(target);
        }
        if target == base {
            debug!("target == base, source wins cleanly");
            return success(source);
        }
        if source == target {
            debug!("source == target, identical changes");
            return success(source);
        }

        let (source_diff, target_diff) = match self.diff_both(base, source, target) {
            Ok(diffs) => diffs,
            Err((error, cause)) => {
                match &error {
                    MergeError::Diff(crate::errors::DiffError::InternalAlgorithm { .. }) => {
                        error!(%error, cause = %cause, "merge failed")
                    }
                    _ => warn!(%error, cause = %cause, "merge aborted"),
                }
                return MergeResult::Failed {
                    error: error.into(),
                    cause,
                };
            }
        };

        let granularity = source_diff.options.granularity;
        let trailing = granularity == Granularity::Line && trailing_newline(base, source, target);
        let base_tokens = super::detector::base_tokens(&source_diff);
        let conflicts = self.detector.detect_conflicts(&source_diff, &target_diff);

        if conflicts.is_empty() {
            let edits = merge_edits(&source_diff, &target_diff, &[]);
            let merged = apply_changes(&base_tokens, edits.iter().copied());
            debug!(applied = edits.len(), "clean merge");
            return MergeResult::Success {
                merged_content: finish(&merged, granularity, trailing),
                applied_changes: edits.len(),
                strategy,
                forced_conflicts: Vec::new(),
            };
        }

        let free = merge_edits(&source_diff, &target_diff, &conflicts);
        if strategy == MergeStrategy::Force {
            let (merged, _) = splice(&base_tokens, &free, &conflicts, |c| &c.source_content);
            warn!(
                conflicts = conflicts.len(),
                "force merge overrode conflicts with source content"
            );
            return MergeResult::Success {
                merged_content: finish(&merged, granularity, trailing),
                applied_changes: free.len() + conflicts.len(),
                strategy,
                forced_conflicts: conflicts,
            };
        }

        let (lines, regions) = splice(&base_tokens, &free, &conflicts, |c| &c.base_content);
        MergeResult::WithConflicts {
            partial_merge: PartialMerge {
                lines,
                regions,
                granularity,
                trailing_newline: trailing,
                labels: labels.clone(),
            },
            conflicts,
            resolution_required: true,
        }
    }

    fn diff_both(
        &self,
        base: &str,
        source: &str,
        target: &str,
    ) -> Result<(TextDiff, TextDiff), (MergeError, String)> {
        let options = self.engine.options();
        let cancel = self.engine.cancellation_token();
        let base_tokens = Tokenizer::tokenize(base, &options);

        let source_tokens = Tokenizer::tokenize(source, &options);
        let source_diff = self
            .engine
            .diff(&base_tokens, &source_tokens, &options, &cancel)
            .map_err(|e| (MergeError::from(e), "diff base->source failed".to_string()))?;

        let target_tokens = Tokenizer::tokenize(target, &options);
        let target_diff = self
            .engine
            .diff(&base_tokens, &target_tokens, &options, &cancel)
            .map_err(|e| (MergeError::from(e), "diff base->target failed".to_string()))?;

        Ok((source_diff, target_diff))
    }

    /// Replace every region of `partial` with its conflict's resolved
    /// content. Fails with [`MergeError::UnresolvedConflicts`] listing every
    /// conflict still open.
    pub fn assemble(
        &self,
        partial: &PartialMerge,
        conflicts: &[MergeConflict],
    ) -> Result<String, MergeError> {
        let mut pending = Vec::new();
        let mut replacements = Vec::with_capacity(partial.regions.len());
        for region in &partial.regions {
            let conflict = find_conflict(conflicts, &region.conflict_id)?;
            match &conflict.resolution {
                Some(resolution) => replacements.push((region, &resolution.resolved_content)),
                None => pending.push(conflict.id.clone()),
            }
        }
        if !pending.is_empty() {
            return Err(MergeError::UnresolvedConflicts { ids: pending });
        }

        let mut lines = partial.lines.clone();
        for (region, content) in replacements.into_iter().rev() {
            let end = region.end.min(lines.len());
            let start = region.start.min(end);
            lines.splice(start..end, content.iter().cloned());
        }
        debug!(regions = partial.regions.len(), "partial merge assembled");
        Ok(partial.finish(&lines))
    }

    /// Quick check: would a `Recursive` merge succeed without conflicts?
    pub fn can_auto_merge(&self, base: &str, source: &str, target: &str) -> bool {
        // If either side is identical to base, no conflict is possible.
        if source == base || target == base || source == target {
            return true;
        }
        match self.diff_both(base, source, target) {
            Ok((s, t)) => self.detector.detect_conflicts(&s, &t).is_empty(),
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn find_conflict<'a>(
    conflicts: &'a [MergeConflict],
    id: &str,
) -> Result<&'a MergeConflict, MergeError> {
    conflicts
        .iter()
        .find(|c| c.id == id)
        .ok_or_else(|| MergeError::UnknownConflict(id.to_string()))
}

/// The merged text ends with a newline when base does, unless exactly one
/// side changed that; if both changed it the source wins.
fn trailing_newline(base: &str, source: &str, target: &str) -> bool {
    let (b, s, t) = (base.ends_with('\n'), source.ends_with('\n'), target.ends_with('\n'));
    if s != b {
        s
    } else if t != b {
        t
    } else {
        b
    }
}

fn finish(tokens: &[String], granularity: Granularity, trailing_newline: bool) -> String {
    let mut content = granularity.join(tokens);
    if trailing_newline && !tokens.is_empty() {
        content.push('\n');
    }
    content
}

/// Edits of both diffs outside every conflict, with changes made by both
/// sides kept once.
fn merge_edits<'a>(
    source: &'a TextDiff,
    target: &'a TextDiff,
    conflicts: &[MergeConflict],
) -> Vec<&'a DiffChange> {
    let mut edits: Vec<&DiffChange> = Vec::new();
    for change in source.edits() {
        let claimed = conflicts
            .iter()
            .any(|c| c.source_changes.iter().any(|o| same_edit(change, o)));
        if !claimed {
            edits.push(change);
        }
    }
    for change in target.edits() {
        let claimed = conflicts
            .iter()
            .any(|c| c.target_changes.iter().any(|o| same_edit(change, o)));
        if !claimed && !edits.iter().any(|e| same_edit(e, change)) {
            edits.push(change);
        }
    }
    edits
}

/// Apply `edits` to `base` front to back, substituting `fill(conflict)` for
/// each conflict range and recording where each one lands.
fn splice<F>(
    base: &[String],
    edits: &[&DiffChange],
    conflicts: &[MergeConflict],
    fill: F,
) -> (Vec<String>, Vec<ConflictRegion>)
where
    F: Fn(&MergeConflict) -> &Vec<String>,
{
    enum Piece<'a> {
        Edit(&'a DiffChange),
        Region(&'a MergeConflict),
    }

    let mut pieces: Vec<(usize, usize, Piece)> = edits
        .iter()
        .map(|&c| (c.old_start, c.old_lines, Piece::Edit(c)))
        .chain(conflicts.iter().map(|c| {
            (
                c.conflict_range.start,
                c.conflict_range.len(),
                Piece::Region(c),
            )
        }))
        .collect();
    // Insertions anchored at a position go before a span starting there.
    pieces.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut out = Vec::with_capacity(base.len());
    let mut regions = Vec::with_capacity(conflicts.len());
    let mut cursor = 0;
    for (start, len, piece) in pieces {
        let start = start.clamp(cursor, base.len());
        out.extend_from_slice(&base[cursor..start]);
        match piece {
            Piece::Edit(change) => out.extend(change.new_texts().iter().cloned()),
            Piece::Region(conflict) => {
                let at = out.len();
                out.extend(fill(conflict).iter().cloned());
                regions.push(ConflictRegion {
                    conflict_id: conflict.id.clone(),
                    start: at,
                    end: out.len(),
                });
            }
        }
        cursor = (start + len).min(base.len());
    }
    out.extend_from_slice(&base[cursor..]);
    (out, regions)
}
