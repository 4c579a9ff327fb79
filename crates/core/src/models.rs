//! Value types shared by the diff, merge and resolution subsystems.
//!
//! Everything here is an owned value object: produced once by the call that
//! creates it and never mutated behind the caller's back. The only lifecycle
//! transition is a [`MergeConflict`] gaining (or, when explicitly reopened,
//! losing) its [`ConflictResolution`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ResolutionError;

// ---------------------------------------------------------------------------
// Diff options
// ---------------------------------------------------------------------------

/// The unit of comparison.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Line,
    Word,
    Character,
}

impl Granularity {
    /// Reassemble token texts into content.
    ///
    /// Lines are joined with `\n` (the terminator is not part of a line
    /// token); word and character tokens carry their own separators.
    pub fn join<S: AsRef<str>>(self, texts: &[S]) -> String {
        match self {
            Self::Line => texts
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Word | Self::Character => texts.iter().map(AsRef::as_ref).collect(),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line => write!(f, "line"),
            Self::Word => write!(f, "word"),
            Self::Character => write!(f, "character"),
        }
    }
}

/// Diff configuration. Passed by value and never mutated after creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffOptions {
    pub ignore_whitespace: bool,
    pub ignore_case: bool,
    /// Context lines used when rendering hunks.
    pub context_lines: usize,
    pub granularity: Granularity,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignore_whitespace: false,
            ignore_case: false,
            context_lines: 3,
            granularity: Granularity::Line,
        }
    }
}

impl DiffOptions {
    /// Whether tokens need a separate comparison key.
    pub fn normalizes(&self) -> bool {
        self.ignore_whitespace || self.ignore_case
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// An indivisible comparison unit: a line, a word or a character.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// Original text, used for output.
    pub text: String,
    /// Comparison key when whitespace/case normalization applies.
    pub normalized: Option<String>,
    /// Index of this token in its sequence.
    pub position: usize,
}

impl Token {
    /// The string compared by the diff engine.
    pub fn key(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.text)
    }
}

// ---------------------------------------------------------------------------
// Edit script
// ---------------------------------------------------------------------------

/// Kind of a single edit operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Insert,
    Delete,
    Modify,
    Equal,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Delete => write!(f, "delete"),
            Self::Modify => write!(f, "modify"),
            Self::Equal => write!(f, "equal"),
        }
    }
}

/// A single edit operation. Positions are 0-based token indices.
///
/// `content` holds the new-side texts for Insert, Modify and Equal, and the
/// removed texts for Delete. `old_content` holds the old-side texts for
/// Modify and Equal and is empty otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DiffChange {
    pub change_type: ChangeType,
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub content: Vec<String>,
    #[serde(default)]
    pub old_content: Vec<String>,
}

impl DiffChange {
    pub fn insert(old_start: usize, new_start: usize, content: Vec<String>) -> Self {
        Self {
            change_type: ChangeType::Insert,
            old_start,
            old_lines: 0,
            new_start,
            new_lines: content.len(),
            content,
            old_content: Vec::new(),
        }
    }

    pub fn delete(old_start: usize, new_start: usize, removed: Vec<String>) -> Self {
        Self {
            change_type: ChangeType::Delete,
            old_start,
            old_lines: removed.len(),
            new_start,
            new_lines: 0,
            content: removed,
            old_content: Vec::new(),
        }
    }

    pub fn modify(
        old_start: usize,
        new_start: usize,
        old_content: Vec<String>,
        content: Vec<String>,
    ) -> Self {
        Self {
            change_type: ChangeType::Modify,
            old_start,
            old_lines: old_content.len(),
            new_start,
            new_lines: content.len(),
            content,
            old_content,
        }
    }

    pub fn equal(
        old_start: usize,
        new_start: usize,
        old_content: Vec<String>,
        content: Vec<String>,
    ) -> Self {
        Self {
            change_type: ChangeType::Equal,
            old_start,
            old_lines: old_content.len(),
            new_start,
            new_lines: content.len(),
            content,
            old_content,
        }
    }

    /// One past the last old-side position covered by this change.
    pub fn old_end(&self) -> usize {
        self.old_start + self.old_lines
    }

    pub fn is_equal(&self) -> bool {
        self.change_type == ChangeType::Equal
    }

    /// The texts this change leaves in the new sequence.
    pub fn new_texts(&self) -> &[String] {
        match self.change_type {
            ChangeType::Delete => &[],
            _ => &self.content,
        }
    }

    /// The texts this change covers in the old sequence.
    pub fn old_texts(&self) -> &[String] {
        match self.change_type {
            ChangeType::Insert => &[],
            ChangeType::Delete => &self.content,
            ChangeType::Modify | ChangeType::Equal => &self.old_content,
        }
    }

    /// The same edit seen from the other side: insertions become deletions
    /// and old/new positions swap.
    pub fn reversed(&self) -> Self {
        match self.change_type {
            ChangeType::Insert => {
                Self::delete(self.new_start, self.old_start, self.content.clone())
            }
            ChangeType::Delete => {
                Self::insert(self.new_start, self.old_start, self.content.clone())
            }
            ChangeType::Modify => Self::modify(
                self.new_start,
                self.old_start,
                self.content.clone(),
                self.old_content.clone(),
            ),
            ChangeType::Equal => Self::equal(
                self.new_start,
                self.old_start,
                self.content.clone(),
                self.old_content.clone(),
            ),
        }
    }
}

/// Derived counts over an edit script.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiffStatistics {
    pub lines_added: usize,
    pub lines_deleted: usize,
    pub lines_modified: usize,
    /// Number of non-Equal changes.
    pub total_changes: usize,
    pub change_percentage: f64,
    pub old_total: usize,
    pub new_total: usize,
}

impl DiffStatistics {
    /// Recompute statistics from a change list.
    pub fn from_changes(changes: &[DiffChange], old_total: usize, new_total: usize) -> Self {
        let mut stats = Self {
            old_total,
            new_total,
            ..Self::default()
        };

        for change in changes {
            match change.change_type {
                ChangeType::Equal => continue,
                ChangeType::Insert => stats.lines_added += change.new_lines,
                ChangeType::Delete => stats.lines_deleted += change.old_lines,
                ChangeType::Modify => {
                    let common = change.old_lines.min(change.new_lines);
                    stats.lines_modified += common;
                    stats.lines_added += change.new_lines - common;
                    stats.lines_deleted += change.old_lines - common;
                }
            }
            stats.total_changes += 1;
        }

        let denominator = old_total.max(new_total);
        if denominator > 0 {
            let touched = stats.lines_added + stats.lines_deleted + stats.lines_modified;
            stats.change_percentage = touched as f64 * 100.0 / denominator as f64;
        }
        stats
    }
}

/// The result of one diff call. Immutable; recombined, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextDiff {
    /// Complete edit script (Equal runs included), ordered by `old_start`.
    pub changes: Vec<DiffChange>,
    pub statistics: DiffStatistics,
    /// Algorithm identifier, e.g. `myers` or `myers-chunked`.
    pub algorithm: String,
    pub options: DiffOptions,
}

impl TextDiff {
    /// Iterate over the edits, skipping Equal runs.
    pub fn edits(&self) -> impl Iterator<Item = &DiffChange> {
        self.changes.iter().filter(|c| !c.is_equal())
    }

    /// True when both sequences compare equal.
    pub fn is_identical(&self) -> bool {
        self.statistics.total_changes == 0
    }

    /// Sum of inserted and deleted tokens, i.e. the edit distance this
    /// script realises.
    pub fn edit_distance(&self) -> usize {
        self.edits().map(|c| c.old_lines + c.new_lines).sum()
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Categorisation of a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides edited overlapping content.
    ContentOverlap,
    /// Both sides changed the same metadata key differently.
    MetadataConflict,
    /// Overlapping edits that also change document structure.
    StructuralChange,
    /// Both sides changed access-control metadata differently.
    PermissionConflict,
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentOverlap => write!(f, "content_overlap"),
            Self::MetadataConflict => write!(f, "metadata_conflict"),
            Self::StructuralChange => write!(f, "structural_change"),
            Self::PermissionConflict => write!(f, "permission_conflict"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Named resolution strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Take the source side of the conflict range.
    AcceptSource,
    /// Take the target side of the conflict range.
    AcceptTarget,
    /// Use content supplied by the caller under `user_input["content"]`.
    ManualMerge,
    /// Combine both sides when that is unambiguous.
    IntelligentMerge,
    /// Never auto-resolve.
    DeferToUser,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcceptSource => write!(f, "accept_source"),
            Self::AcceptTarget => write!(f, "accept_target"),
            Self::ManualMerge => write!(f, "manual_merge"),
            Self::IntelligentMerge => write!(f, "intelligent_merge"),
            Self::DeferToUser => write!(f, "defer_to_user"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuggestedResolution {
    pub strategy: ResolutionStrategy,
    pub confidence: Confidence,
    pub rationale: String,
}

/// How much of the document a conflict touches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictImpact {
    pub base_lines: usize,
    pub source_lines: usize,
    pub target_lines: usize,
    /// Whether headings or list structure are involved.
    pub structural: bool,
}

/// Half-open interval `[start, end)` of base positions. `start == end`
/// denotes an insertion point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConflictRange {
    pub start: usize,
    pub end: usize,
}

impl ConflictRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The outcome of resolving one conflict. Immutable once attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    pub resolved_content: Vec<String>,
    pub user_input: BTreeMap<String, String>,
    /// The content was derived by the engine rather than supplied by a user.
    pub automated_applied: bool,
    pub resolved_at: DateTime<Utc>,
}

/// A region where source and target edit the base incompatibly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConflict {
    /// Unique conflict ID.
    pub id: String,
    pub conflict_type: ConflictType,
    pub source_changes: Vec<DiffChange>,
    pub target_changes: Vec<DiffChange>,
    pub conflict_range: ConflictRange,
    pub severity: Severity,
    pub impact: ConflictImpact,
    pub suggested_resolution: SuggestedResolution,
    /// Base texts inside `conflict_range`.
    pub base_content: Vec<String>,
    /// The range as the source side left it.
    pub source_content: Vec<String>,
    /// The range as the target side left it.
    pub target_content: Vec<String>,
    pub resolution: Option<ConflictResolution>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// How many times a resolution was withdrawn.
    #[serde(default)]
    pub reopen_count: u32,
}

impl MergeConflict {
    /// Create an unresolved conflict with a fresh UUID.
    pub fn new(
        conflict_type: ConflictType,
        conflict_range: ConflictRange,
        suggested_resolution: SuggestedResolution,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conflict_type,
            source_changes: Vec::new(),
            target_changes: Vec::new(),
            conflict_range,
            severity: Severity::Low,
            impact: ConflictImpact::default(),
            suggested_resolution,
            base_content: Vec::new(),
            source_content: Vec::new(),
            target_content: Vec::new(),
            resolution: None,
            detected_at: Utc::now(),
            resolved_at: None,
            reopen_count: 0,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Attach a resolution. A conflict is resolved at most once until it is
    /// explicitly reopened.
    pub fn attach_resolution(
        &mut self,
        resolution: ConflictResolution,
    ) -> Result<(), ResolutionError> {
        if self.resolution.is_some() {
            return Err(ResolutionError::AlreadyResolved(self.id.clone()));
        }
        self.resolved_at = Some(resolution.resolved_at);
        self.resolution = Some(resolution);
        Ok(())
    }

    /// Withdraw the resolution, returning it. Callers go through
    /// `ConflictResolver::reopen` so the action is audited.
    pub(crate) fn take_resolution(&mut self) -> Result<ConflictResolution, ResolutionError> {
        let resolution = self
            .resolution
            .take()
            .ok_or_else(|| ResolutionError::NotResolved(self.id.clone()))?;
        self.resolved_at = None;
        self.reopen_count += 1;
        Ok(resolution)
    }
}
