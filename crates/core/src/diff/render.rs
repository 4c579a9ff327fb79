//! Unified-diff rendering of a [`TextDiff`].

use std::fmt::Write as _;

use crate::models::{ChangeType, TextDiff};

/// One rendered line: tag, old cursor, new cursor, text.
struct Line<'a> {
    tag: char,
    old_pos: usize,
    new_pos: usize,
    text: &'a str,
}

/// Render `diff` in unified format with `diff.options.context_lines` lines
/// of context. Hunk headers are 1-based; an empty side reports the position
/// before the hunk, as `diff -u` does. Identical inputs render as an empty
/// string.
pub fn render_unified(diff: &TextDiff, old_label: &str, new_label: &str) -> String {
    let lines = flatten(diff);
    let changed: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.tag != ' ')
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return String::new();
    }

    let context = diff.options.context_lines;
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &i in &changed {
        let start = i.saturating_sub(context);
        let end = (i + context + 1).min(lines.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => hunks.push((start, end)),
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "--- {old_label}");
    let _ = writeln!(out, "+++ {new_label}");
    for (start, end) in hunks {
        let body = &lines[start..end];
        let old_count = body.iter().filter(|l| l.tag != '+').count();
        let new_count = body.iter().filter(|l| l.tag != '-').count();
        let old_start = body[0].old_pos + usize::from(old_count > 0);
        let new_start = body[0].new_pos + usize::from(new_count > 0);
        let _ = writeln!(out, "@@ -{old_start},{old_count} +{new_start},{new_count} @@");
        for line in body {
            let _ = writeln!(out, "{}{}", line.tag, line.text);
        }
    }
    out
}

fn flatten(diff: &TextDiff) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    for change in &diff.changes {
        let (mut old_pos, mut new_pos) = (change.old_start, change.new_start);
        let removed: &[String] = match change.change_type {
            ChangeType::Equal | ChangeType::Insert => &[],
            _ => change.old_texts(),
        };
        let added: &[String] = match change.change_type {
            ChangeType::Equal | ChangeType::Delete => &[],
            _ => change.new_texts(),
        };

        if change.is_equal() {
            for text in change.new_texts() {
                lines.push(Line {
                    tag: ' ',
                    old_pos,
                    new_pos,
                    text,
                });
                old_pos += 1;
                new_pos += 1;
            }
            continue;
        }
        for text in removed {
            lines.push(Line {
                tag: '-',
                old_pos,
                new_pos,
                text,
            });
            old_pos += 1;
        }
        for text in added {
            lines.push(Line {
                tag: '+',
                old_pos,
                new_pos,
                text,
            });
            new_pos += 1;
        }
    }
    lines
}
