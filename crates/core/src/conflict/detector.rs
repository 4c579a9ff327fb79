//! Conflict detection logic.
//!
//! Given the diffs base→source and base→target, the detector groups nearby
//! changes on each side and reports every place where a source group and a
//! target group touch the same base content in different ways.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::{debug, info};

use crate::config::ConflictConfig;
use crate::diff::apply_changes;
use crate::models::{
    ChangeType, Confidence, ConflictImpact, ConflictRange, ConflictType, DiffChange,
    MergeConflict, ResolutionStrategy, Severity, SuggestedResolution, TextDiff,
};

/// Headings and list items. A line matching any of these is structural.
static STRUCTURE_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^#{1,6}\s",
        r"^\s*([-*+]|\d+[.)])\s",
        r"(?i)^\s*(article|section|clause)\s+\S",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Whether `line` is a heading or list item.
pub fn is_structural(line: &str) -> bool {
    STRUCTURE_MARKERS.iter().any(|re| re.is_match(line))
}

fn markers(lines: &[String]) -> Vec<&str> {
    lines
        .iter()
        .map(String::as_str)
        .filter(|l| is_structural(l))
        .collect()
}

// ---------------------------------------------------------------------------
// Change groups
// ---------------------------------------------------------------------------

/// Nearby changes from one side, treated as one unit for overlap checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeGroup {
    pub changes: Vec<DiffChange>,
    /// First base position touched.
    pub old_start: usize,
    /// One past the last base position touched; equal to `old_start` for a
    /// group of pure insertions at one point.
    pub old_end: usize,
}

impl ChangeGroup {
    fn new(change: DiffChange) -> Self {
        Self {
            old_start: change.old_start,
            old_end: change.old_end(),
            changes: vec![change],
        }
    }

    fn push(&mut self, change: DiffChange) {
        self.old_end = self.old_end.max(change.old_end());
        self.changes.push(change);
    }

    pub fn is_point(&self) -> bool {
        self.old_start == self.old_end
    }

    /// Whether two groups touch the same base content, either as whole
    /// ranges or through any pair of their individual changes.
    ///
    /// Two spans overlap when they intersect. A point (insertion) overlaps a
    /// span only strictly inside it, and two points overlap when they are at
    /// the same position. A group's range hides the insertion points inside
    /// it, so those are checked change by change.
    pub fn overlaps(&self, other: &ChangeGroup) -> bool {
        ranges_overlap(
            (self.old_start, self.old_end),
            (other.old_start, other.old_end),
        ) || self.changes.iter().any(|a| {
            other
                .changes
                .iter()
                .any(|b| ranges_overlap((a.old_start, a.old_end()), (b.old_start, b.old_end())))
        })
    }

    /// Whether both groups make exactly the same edits.
    pub fn same_edits(&self, other: &ChangeGroup) -> bool {
        self.changes.len() == other.changes.len()
            && self
                .changes
                .iter()
                .zip(&other.changes)
                .all(|(a, b)| same_edit(a, b))
    }
}

fn ranges_overlap((a0, a1): (usize, usize), (b0, b1): (usize, usize)) -> bool {
    match (a0 == a1, b0 == b1) {
        (false, false) => a0 < b1 && b0 < a1,
        (true, false) => b0 < a0 && a0 < b1,
        (false, true) => a0 < b0 && b0 < a1,
        (true, true) => a0 == b0,
    }
}

/// Two changes have the same effect on the base: same span, same result.
/// `new_start` is ignored since it depends on earlier edits of each side.
pub fn same_edit(a: &DiffChange, b: &DiffChange) -> bool {
    a.old_start == b.old_start && a.old_lines == b.old_lines && a.new_texts() == b.new_texts()
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Conflict detector. Holds only its thresholds.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    config: ConflictConfig,
}

impl ConflictDetector {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    /// Group the edits of `diff` in one left-to-right pass. A change joins
    /// the current group when it starts within `proximity_gap` positions of
    /// the group's end.
    pub fn group_changes(&self, diff: &TextDiff) -> Vec<ChangeGroup> {
        let mut edits: Vec<&DiffChange> = diff.edits().collect();
        edits.sort_by_key(|c| c.old_start);

        let mut groups: Vec<ChangeGroup> = Vec::new();
        for change in edits {
            match groups.last_mut() {
                Some(group) if change.old_start <= group.old_end + self.config.proximity_gap => {
                    group.push(change.clone())
                }
                _ => groups.push(ChangeGroup::new(change.clone())),
            }
        }
        groups
    }

    /// Find conflicts between two diffs of the same base.
    ///
    /// Overlapping group pairs are merged transitively, so returned conflict
    /// ranges are disjoint. Output is ordered by range start.
    pub fn detect_conflicts(&self, source: &TextDiff, target: &TextDiff) -> Vec<MergeConflict> {
        let source_groups = self.group_changes(source);
        let target_groups = self.group_changes(target);
        info!(
            source_groups = source_groups.len(),
            target_groups = target_groups.len(),
            "detecting conflicts"
        );

        // Union-find over source groups [0, s) and target groups [s, s+t).
        let offset = source_groups.len();
        let mut parent: Vec<usize> = (0..offset + target_groups.len()).collect();
        let mut conflicting = vec![false; parent.len()];
        let mut identical: Vec<(usize, usize)> = Vec::new();

        for (i, sg) in source_groups.iter().enumerate() {
            for (j, tg) in target_groups.iter().enumerate() {
                if tg.old_start > sg.old_end {
                    break;
                }
                if !sg.overlaps(tg) {
                    continue;
                }
                if sg.same_edits(tg) {
                    identical.push((i, offset + j));
                } else {
                    debug!(
                        source_range = ?(sg.old_start, sg.old_end),
                        target_range = ?(tg.old_start, tg.old_end),
                        "overlapping change groups"
                    );
                    union(&mut parent, i, offset + j);
                    conflicting[i] = true;
                    conflicting[offset + j] = true;
                }
            }
        }

        // A group identical to its counterpart still joins the counterpart's
        // conflict when the counterpart conflicts with something else.
        let mut changed = true;
        while changed {
            changed = false;
            for &(a, b) in &identical {
                if conflicting[a] != conflicting[b] {
                    union(&mut parent, a, b);
                    conflicting[a] = true;
                    conflicting[b] = true;
                    changed = true;
                }
            }
        }

        let mut components: BTreeMap<usize, (Vec<&ChangeGroup>, Vec<&ChangeGroup>)> =
            BTreeMap::new();
        for node in (0..parent.len()).filter(|&n| conflicting[n]) {
            let root = find(&mut parent, node);
            let entry = components.entry(root).or_default();
            if node < offset {
                entry.0.push(&source_groups[node]);
            } else {
                entry.1.push(&target_groups[node - offset]);
            }
        }

        let base = base_tokens(source);
        let mut conflicts: Vec<MergeConflict> = components
            .into_values()
            .map(|(sgs, tgs)| self.build_conflict(&base, &sgs, &tgs))
            .collect();
        conflicts.sort_by_key(|c| c.conflict_range.start);

        info!(count = conflicts.len(), "conflict detection complete");
        conflicts
    }

    fn build_conflict(
        &self,
        base: &[String],
        source_groups: &[&ChangeGroup],
        target_groups: &[&ChangeGroup],
    ) -> MergeConflict {
        let all = source_groups.iter().chain(target_groups);
        let start = all.clone().map(|g| g.old_start).min().unwrap_or(0);
        let end = all.map(|g| g.old_end).max().unwrap_or(start);
        let range = ConflictRange { start, end };

        let source_changes: Vec<DiffChange> = source_groups
            .iter()
            .flat_map(|g| g.changes.iter().cloned())
            .collect();
        let target_changes: Vec<DiffChange> = target_groups
            .iter()
            .flat_map(|g| g.changes.iter().cloned())
            .collect();

        let base_content = base[start.min(base.len())..end.min(base.len())].to_vec();
        let source_content = render_side(&base_content, range, &source_changes);
        let target_content = render_side(&base_content, range, &target_changes);

        let base_markers = markers(&base_content);
        let source_markers = markers(&source_content);
        let target_markers = markers(&target_content);
        let structural =
            !base_markers.is_empty() || !source_markers.is_empty() || !target_markers.is_empty();
        let conflict_type = if base_markers != source_markers || base_markers != target_markers {
            ConflictType::StructuralChange
        } else {
            ConflictType::ContentOverlap
        };

        let size = range.len().max(1);
        let severity = if structural || size > self.config.critical_severity_lines {
            Severity::Critical
        } else if size > self.config.high_severity_lines {
            Severity::High
        } else if size > 1 {
            Severity::Medium
        } else {
            Severity::Low
        };

        let suggestion = suggest(&source_changes, &target_changes);
        let mut conflict = MergeConflict::new(conflict_type, range, suggestion);
        conflict.severity = severity;
        conflict.impact = ConflictImpact {
            base_lines: base_content.len(),
            source_lines: source_content.len(),
            target_lines: target_content.len(),
            structural,
        };
        conflict.source_changes = source_changes;
        conflict.target_changes = target_changes;
        conflict.base_content = base_content;
        conflict.source_content = source_content;
        conflict.target_content = target_content;

        debug!(
            id = %conflict.id,
            conflict_type = %conflict.conflict_type,
            severity = %conflict.severity,
            start,
            end,
            "conflict detected"
        );
        conflict
    }
}

/// The base sequence, recovered from the old side of a complete diff.
pub fn base_tokens(diff: &TextDiff) -> Vec<String> {
    diff.changes
        .iter()
        .flat_map(|c| c.old_texts().iter().cloned())
        .collect()
}

/// One side's version of a conflict range: its changes applied to the base
/// texts of the range.
pub fn render_side(base_range: &[String], range: ConflictRange, changes: &[DiffChange]) -> Vec<String> {
    let shifted: Vec<DiffChange> = changes
        .iter()
        .map(|c| {
            let mut c = c.clone();
            c.old_start = c.old_start.saturating_sub(range.start);
            c
        })
        .collect();
    apply_changes(base_range, &shifted)
}

fn pure_insert(changes: &[DiffChange]) -> bool {
    !changes.is_empty() && changes.iter().all(|c| c.change_type == ChangeType::Insert)
}

fn suggest(source: &[DiffChange], target: &[DiffChange]) -> SuggestedResolution {
    match (pure_insert(source), pure_insert(target)) {
        (true, true) => SuggestedResolution {
            strategy: ResolutionStrategy::IntelligentMerge,
            confidence: Confidence::Medium,
            rationale: "both sides only insert content".into(),
        },
        (true, false) => SuggestedResolution {
            strategy: ResolutionStrategy::AcceptSource,
            confidence: Confidence::Medium,
            rationale: "source only inserts content".into(),
        },
        (false, true) => SuggestedResolution {
            strategy: ResolutionStrategy::AcceptTarget,
            confidence: Confidence::Medium,
            rationale: "target only inserts content".into(),
        },
        (false, false) => SuggestedResolution {
            strategy: ResolutionStrategy::ManualMerge,
            confidence: Confidence::High,
            rationale: "both sides modify the same content".into(),
        },
    }
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[rb.max(ra)] = ra.min(rb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::MyersDiffEngine;

    fn diff(old: &str, new: &str) -> TextDiff {
        MyersDiffEngine::default().diff_text(old, new).unwrap()
    }

    fn detect(base: &str, source: &str, target: &str) -> Vec<MergeConflict> {
        ConflictDetector::default().detect_conflicts(&diff(base, source), &diff(base, target))
    }

    fn group(start: usize, end: usize) -> ChangeGroup {
        let change = if start == end {
            DiffChange::insert(start, start, vec!["x".into()])
        } else {
            DiffChange::delete(start, start, vec!["x".into(); end - start])
        };
        ChangeGroup::new(change)
    }

    #[test]
    fn test_overlap_rules() {
        assert!(group(1, 3).overlaps(&group(2, 5)));
        assert!(!group(1, 3).overlaps(&group(3, 5)));
        // Points overlap spans only strictly inside.
        assert!(group(2, 2).overlaps(&group(1, 3)));
        assert!(!group(1, 1).overlaps(&group(1, 3)));
        assert!(!group(3, 5).overlaps(&group(5, 5)));
        assert!(group(4, 4).overlaps(&group(4, 4)));
        assert!(!group(4, 4).overlaps(&group(5, 5)));
    }

    #[test]
    fn test_overlap_checks_points_inside_groups() {
        let mut grouped = ChangeGroup::new(DiffChange::insert(1, 1, vec!["s1".into()]));
        grouped.push(DiffChange::insert(3, 4, vec!["s2".into()]));
        assert_eq!((grouped.old_start, grouped.old_end), (1, 3));

        assert!(grouped.overlaps(&group(1, 1)));
        assert!(group(3, 3).overlaps(&grouped));
        assert!(!grouped.overlaps(&group(0, 0)));
        assert!(!grouped.overlaps(&group(4, 4)));
    }

    #[test]
    fn test_insert_at_same_point_as_grouped_insert() {
        let base = "a\nb\nc\nd\ne\nf";
        let target = "a\nT\nb\nc\nd\ne\nf";

        let conflicts = detect(base, "a\nS1\nb\nc\nd\ne\nf", target);
        assert_eq!(conflicts.len(), 1);

        // A second source insertion within the proximity gap must not hide
        // the clash at position 1.
        let conflicts = detect(base, "a\nS1\nb\nc\nS2\nd\ne\nf", target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_range, ConflictRange { start: 1, end: 3 });
        assert_eq!(conflicts[0].source_changes.len(), 2);
        assert_eq!(conflicts[0].target_content, vec!["T", "b", "c"]);
    }

    #[test]
    fn test_grouping_by_proximity() {
        let d = diff(
            "a\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\nl",
            "A\nb\nC\nd\ne\nf\ng\nh\ni\nj\nk\nL",
        );
        let groups = ConflictDetector::default().group_changes(&d);
        assert_eq!(groups.len(), 2);
        assert_eq!((groups[0].old_start, groups[0].old_end), (0, 3));
        assert_eq!(groups[0].changes.len(), 2);
        assert_eq!((groups[1].old_start, groups[1].old_end), (11, 12));
    }

    #[test]
    fn test_adjacent_edits_do_not_conflict() {
        assert!(detect("A\nB\nC", "A\nX\nC", "A\nB\nY\nC").is_empty());
    }

    #[test]
    fn test_same_line_modified_differently() {
        let conflicts = detect("line1\nline2\nline3", "line1\nsource\nline3", "line1\ntarget\nline3");
        assert_eq!(conflicts.len(), 1);
        let c = &conflicts[0];
        assert_eq!(c.conflict_type, ConflictType::ContentOverlap);
        assert_eq!(c.severity, Severity::Low);
        assert_eq!(c.conflict_range, ConflictRange { start: 1, end: 2 });
        assert_eq!(c.base_content, vec!["line2"]);
        assert_eq!(c.source_content, vec!["source"]);
        assert_eq!(c.target_content, vec!["target"]);
        assert_eq!(c.suggested_resolution.strategy, ResolutionStrategy::ManualMerge);
        assert_eq!(c.suggested_resolution.confidence, Confidence::High);
    }

    #[test]
    fn test_identical_changes_do_not_conflict() {
        assert!(detect("a\nb\nc", "a\nX\nc", "a\nX\nc").is_empty());
    }

    #[test]
    fn test_inserts_at_same_point() {
        let conflicts = detect("a\nb", "a\ns\nb", "a\nt\nb");
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].conflict_range.is_empty());
        assert_eq!(
            conflicts[0].suggested_resolution.strategy,
            ResolutionStrategy::IntelligentMerge
        );
        assert_eq!(conflicts[0].source_content, vec!["s"]);
    }

    #[test]
    fn test_insert_inside_modified_span() {
        let conflicts = detect("a\nb\nc\nd", "a\nB\nC\nd", "a\nb\nnew\nc\nd");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_range, ConflictRange { start: 1, end: 3 });
        assert_eq!(conflicts[0].severity, Severity::Medium);
        assert_eq!(conflicts[0].target_content, vec!["b", "new", "c"]);
        assert_eq!(
            conflicts[0].suggested_resolution.strategy,
            ResolutionStrategy::AcceptTarget
        );
    }

    #[test]
    fn test_shared_group_merges_conflicts() {
        // One source edit spans two separate target edits.
        let base = "0\n1\n2\n3\n4\n5\n6\n7\n8\n9";
        let source = "0\nX\nX\nX\nX\nX\nX\nX\nX\n9";
        let target = "0\nT\n2\n3\n4\n5\n6\n7\nU\n9";
        let conflicts = detect(base, source, target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_range, ConflictRange { start: 1, end: 9 });
        assert_eq!(conflicts[0].target_changes.len(), 2);
    }

    #[test]
    fn test_structural_conflict_is_critical() {
        let conflicts = detect(
            "# Title\nbody",
            "## Renamed\nbody",
            "# Other\nbody",
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::StructuralChange);
        assert_eq!(conflicts[0].severity, Severity::Critical);
        assert!(conflicts[0].impact.structural);
    }

    #[test]
    fn test_large_range_severity() {
        let base: Vec<String> = (0..20).map(|i| format!("l{i}")).collect();
        let source: Vec<String> = (0..20).map(|i| format!("s{i}")).collect();
        let target: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
        let conflicts = detect(&base.join("\n"), &source.join("\n"), &target.join("\n"));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::High);
    }

    #[test]
    fn test_structure_markers() {
        assert_eq!(STRUCTURE_MARKERS.len(), 3);
        assert!(is_structural("# Heading"));
        assert!(is_structural("  - bullet"));
        assert!(is_structural("12. numbered"));
        assert!(is_structural("ARTICLE 4"));
        assert!(is_structural("Section 2.1 Scope"));
        assert!(!is_structural("#hashtag"));
        assert!(!is_structural("plain sentence"));
        assert!(!is_structural("Articles of faith"));
    }
}
