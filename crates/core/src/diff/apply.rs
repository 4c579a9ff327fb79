//! Applying an edit script to a token sequence.

use crate::models::DiffChange;

/// Apply `changes` to `base` and return the edited sequence.
///
/// Changes are applied from the highest `old_start` down so earlier offsets
/// stay valid; at equal `old_start` the wider change goes first, which puts a
/// replacement before an insertion anchored at the same point. Equal runs are
/// skipped. Offsets beyond the end of `base` are clamped.
pub fn apply_changes<'a, I>(base: &[String], changes: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a DiffChange>,
{
    let mut edits: Vec<&DiffChange> = changes.into_iter().filter(|c| !c.is_equal()).collect();
    edits.sort_by(|a, b| {
        b.old_start
            .cmp(&a.old_start)
            .then(b.old_lines.cmp(&a.old_lines))
    });

    let mut lines = base.to_vec();
    for change in edits {
        let start = change.old_start.min(lines.len());
        let end = change.old_end().min(lines.len());
        lines.splice(start..end, change.new_texts().iter().cloned());
    }
    lines
}
