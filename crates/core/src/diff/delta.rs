//! Compact copy/insert deltas for storing a version relative to another.
//!
//! A [`Delta`] replays a diff without the old content: unchanged runs become
//! `Copy` ops that reference the old sequence, everything else is carried
//! inline. Deltas serialize with serde so they can be persisted next to the
//! version they reconstruct.

use serde::{Deserialize, Serialize};

use crate::errors::DiffError;
use crate::models::{ChangeType, Granularity, TextDiff};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOp {
    /// Copy `len` tokens from the old sequence starting at `old_start`.
    Copy { old_start: usize, len: usize },
    /// Emit these tokens verbatim.
    Insert { texts: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delta {
    pub ops: Vec<DeltaOp>,
    pub granularity: Granularity,
    /// Length of the sequence the delta applies to.
    pub old_len: usize,
    /// Length of the sequence the delta produces.
    pub new_len: usize,
}

impl Delta {
    /// Build a delta from a diff.
    ///
    /// An Equal run whose texts differ from the old side (possible when the
    /// diff ignored whitespace or case) is stored as an insert, so applying
    /// the delta always reproduces the new text exactly.
    pub fn from_diff(diff: &TextDiff) -> Self {
        let mut ops: Vec<DeltaOp> = Vec::new();
        for change in &diff.changes {
            match change.change_type {
                ChangeType::Equal if change.old_content == change.content => {
                    push_copy(&mut ops, change.old_start, change.old_lines)
                }
                ChangeType::Delete => {}
                _ => push_insert(&mut ops, change.new_texts()),
            }
        }
        Self {
            ops,
            granularity: diff.options.granularity,
            old_len: diff.statistics.old_total,
            new_len: diff.statistics.new_total,
        }
    }

    /// Reconstruct the new sequence from `old`.
    pub fn apply(&self, old: &[String]) -> Result<Vec<String>, DiffError> {
        if old.len() != self.old_len {
            return Err(DiffError::InvalidDelta {
                detail: format!("expected {} tokens, got {}", self.old_len, old.len()),
            });
        }

        let mut out = Vec::with_capacity(self.new_len);
        for op in &self.ops {
            match op {
                DeltaOp::Copy { old_start, len } => {
                    let run = old.get(*old_start..old_start + len).ok_or_else(|| {
                        DiffError::InvalidDelta {
                            detail: format!(
                                "copy {}..{} outside {} tokens",
                                old_start,
                                old_start + len,
                                old.len()
                            ),
                        }
                    })?;
                    out.extend_from_slice(run);
                }
                DeltaOp::Insert { texts } => out.extend(texts.iter().cloned()),
            }
        }
        Ok(out)
    }

    /// [`apply`](Self::apply) on joined content.
    pub fn apply_text(&self, old: &[String]) -> Result<String, DiffError> {
        Ok(self.granularity.join(&self.apply(old)?))
    }

    /// Tokens carried inline by the delta.
    pub fn inserted_len(&self) -> usize {
        self.ops
            .iter()
            .map(|op| match op {
                DeltaOp::Insert { texts } => texts.len(),
                DeltaOp::Copy { .. } => 0,
            })
            .sum()
    }
}

fn push_copy(ops: &mut Vec<DeltaOp>, start: usize, len: usize) {
    if len == 0 {
        return;
    }
    if let Some(DeltaOp::Copy { old_start, len: prev }) = ops.last_mut() {
        if *old_start + *prev == start {
            *prev += len;
            return;
        }
    }
    ops.push(DeltaOp::Copy {
        old_start: start,
        len,
    });
}

fn push_insert(ops: &mut Vec<DeltaOp>, texts: &[String]) {
    if texts.is_empty() {
        return;
    }
    if let Some(DeltaOp::Insert { texts: prev }) = ops.last_mut() {
        prev.extend(texts.iter().cloned());
        return;
    }
    ops.push(DeltaOp::Insert {
        texts: texts.to_vec(),
    });
}
