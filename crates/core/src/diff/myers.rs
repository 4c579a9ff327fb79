//! Myers O(ND) diff.
//!
//! The forward search walks the edit graph one edit distance `d` at a time,
//! keeping in `v[k]` the furthest `x` reached on diagonal `k = x - y`. After
//! every round the window `v[-d..=d]` is frozen into the trace, an arena of
//! immutable snapshots indexed by `d`. The backtrack replays the decisions of
//! each round from the snapshot of the round before it.
//!
//! Memory is O(D^2) in the edit distance D; pathological inputs are bounded
//! by chunking and by the cancellation token, which is polled once per `d`.

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::cancel::CancellationToken;
use super::tokenizer::Tokenizer;
use crate::audit::{AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::config::DiffConfig;
use crate::errors::DiffError;
use crate::models::{DiffChange, DiffOptions, DiffStatistics, TextDiff, Token};

pub const ALGORITHM: &str = "myers";
pub const ALGORITHM_CHUNKED: &str = "myers-chunked";

/// One step of the shortest edit script, with absolute token indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal { old: usize, new: usize },
    Delete { old: usize },
    Insert { new: usize },
}

/// Myers diff engine.
///
/// Holds configuration and the audit sink only; every call allocates its own
/// working buffers, so one engine can serve many threads.
pub struct MyersDiffEngine {
    options: DiffOptions,
    chunk_threshold: usize,
    timeout: Option<std::time::Duration>,
    audit: Arc<dyn AuditSink>,
}

impl Default for MyersDiffEngine {
    fn default() -> Self {
        Self::new(&DiffConfig::default(), Arc::new(NullAuditSink))
    }
}

impl MyersDiffEngine {
    pub fn new(config: &DiffConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            options: config.options(),
            chunk_threshold: config.chunk_threshold.max(1),
            timeout: config.timeout(),
            audit,
        }
    }

    /// Default options for [`diff_text`](Self::diff_text).
    pub fn options(&self) -> DiffOptions {
        self.options
    }

    pub fn chunk_threshold(&self) -> usize {
        self.chunk_threshold
    }

    /// A fresh token honouring the configured timeout.
    pub fn cancellation_token(&self) -> CancellationToken {
        CancellationToken::from_timeout(self.timeout)
    }

    /// Tokenize both texts with the configured options, diff them and emit a
    /// `DIFF_CALCULATED` audit event.
    pub fn diff_text(&self, old: &str, new: &str) -> Result<TextDiff, DiffError> {
        self.diff_text_with(old, new, &self.options)
    }

    /// [`diff_text`](Self::diff_text) with explicit options.
    pub fn diff_text_with(
        &self,
        old: &str,
        new: &str,
        options: &DiffOptions,
    ) -> Result<TextDiff, DiffError> {
        let started = Instant::now();
        let old_tokens = Tokenizer::tokenize(old, options);
        let new_tokens = Tokenizer::tokenize(new, options);
        let result = self.diff(&old_tokens, &new_tokens, options, &self.cancellation_token());

        let mut event = AuditEvent::new(AuditEventType::DiffCalculated)
            .with("granularity", options.granularity.to_string())
            .with("old_tokens", old_tokens.len())
            .with("new_tokens", new_tokens.len())
            .with_duration(started.elapsed());
        event = match &result {
            Ok(diff) => event
                .with("outcome", "ok")
                .with("algorithm", diff.algorithm.clone())
                .with("total_changes", diff.statistics.total_changes)
                .with("lines_added", diff.statistics.lines_added)
                .with("lines_deleted", diff.statistics.lines_deleted)
                .with("lines_modified", diff.statistics.lines_modified),
            Err(e) => event.with("outcome", "error").with("error", e.to_string()),
        };
        self.audit.emit(event);

        result
    }

    /// Compute the shortest edit script between two token sequences.
    ///
    /// Pure apart from logging: no audit event is emitted, which lets the
    /// merge engine diff without double-reporting.
    pub fn diff(
        &self,
        old: &[Token],
        new: &[Token],
        options: &DiffOptions,
        cancel: &CancellationToken,
    ) -> Result<TextDiff, DiffError> {
        let old_keys: Vec<&str> = old.iter().map(Token::key).collect();
        let new_keys: Vec<&str> = new.iter().map(Token::key).collect();

        let chunked = old.len() > self.chunk_threshold || new.len() > self.chunk_threshold;
        let edits = if chunked {
            self.diff_chunked(&old_keys, &new_keys, cancel)?
        } else {
            diff_range(&old_keys, &new_keys, 0, 0, cancel)?
        };

        let changes = build_changes(&edits, old, new);
        let statistics = DiffStatistics::from_changes(&changes, old.len(), new.len());
        debug!(
            old_tokens = old.len(),
            new_tokens = new.len(),
            total_changes = statistics.total_changes,
            chunked,
            "diff computed"
        );

        Ok(TextDiff {
            changes,
            statistics,
            algorithm: if chunked { ALGORITHM_CHUNKED } else { ALGORITHM }.to_string(),
            options: *options,
        })
    }

    /// Diff aligned fixed-size chunks independently and concatenate the
    /// scripts in chunk order. Chunks run on scoped worker threads, at most
    /// `available_parallelism` at a time.
    fn diff_chunked(
        &self,
        old: &[&str],
        new: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<Edit>, DiffError> {
        let ranges = chunk_ranges(old.len(), new.len(), self.chunk_threshold);
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        info!(
            old_tokens = old.len(),
            new_tokens = new.len(),
            chunks = ranges.len(),
            workers,
            "input above chunk threshold, diffing in chunks"
        );

        let mut edits = Vec::with_capacity(old.len().max(new.len()));
        for batch in ranges.chunks(workers) {
            let results: Vec<Result<Vec<Edit>, DiffError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|(o, n)| {
                        let (o, n) = (o.clone(), n.clone());
                        scope.spawn(move || {
                            diff_range(&old[o.clone()], &new[n.clone()], o.start, n.start, cancel)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| {
                            Err(DiffError::InternalAlgorithm {
                                detail: "chunk worker panicked".into(),
                            })
                        })
                    })
                    .collect()
            });
            for result in results {
                edits.extend(result?);
            }
        }
        Ok(edits)
    }
}

/// Aligned chunk bounds: chunk `i` covers `[i*size, (i+1)*size)` on both
/// sides, clamped (possibly empty) where a side is exhausted.
fn chunk_ranges(n: usize, m: usize, size: usize) -> Vec<(Range<usize>, Range<usize>)> {
    let count = n.max(m).div_ceil(size);
    (0..count)
        .map(|i| {
            let start = i * size;
            let end = start + size;
            (
                start.min(n)..end.min(n),
                start.min(m)..end.min(m),
            )
        })
        .collect()
}

/// Diff one slice pair. Common prefix and suffix are matched directly; only
/// the middle goes through the edit-graph search.
fn diff_range(
    old: &[&str],
    new: &[&str],
    old_offset: usize,
    new_offset: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Edit>, DiffError> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    for i in 0..prefix {
        edits.push(Edit::Equal {
            old: old_offset + i,
            new: new_offset + i,
        });
    }

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];
    edits.extend(shortest_edit(
        old_mid,
        new_mid,
        old_offset + prefix,
        new_offset + prefix,
        cancel,
    )?);

    for i in 0..suffix {
        edits.push(Edit::Equal {
            old: old_offset + old.len() - suffix + i,
            new: new_offset + new.len() - suffix + i,
        });
    }
    Ok(edits)
}

/// Forward Myers search followed by the backtrack.
fn shortest_edit(
    a: &[&str],
    b: &[&str],
    old_offset: usize,
    new_offset: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Edit>, DiffError> {
    let n = a.len();
    let m = b.len();

    if n == 0 {
        return Ok((0..m)
            .map(|j| Edit::Insert {
                new: new_offset + j,
            })
            .collect());
    }
    if m == 0 {
        return Ok((0..n)
            .map(|i| Edit::Delete {
                old: old_offset + i,
            })
            .collect());
    }

    let max = n + m;
    let offset = max as isize;
    let (n_i, m_i) = (n as isize, m as isize);
    let mut v: Vec<isize> = vec![0; 2 * max + 1];
    let mut trace: Vec<Vec<isize>> = Vec::new();

    for d in 0..=max {
        cancel.check(d)?;
        let d_i = d as isize;

        let mut k = -d_i;
        while k <= d_i {
            let idx = (k + offset) as usize;
            let mut x = if k == -d_i || (k != d_i && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;

            while x < n_i && y < m_i && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;

            if x >= n_i && y >= m_i {
                trace.push(v[(offset - d_i) as usize..=(offset + d_i) as usize].to_vec());
                return backtrack(&trace, n, m, old_offset, new_offset);
            }
            k += 2;
        }

        trace.push(v[(offset - d_i) as usize..=(offset + d_i) as usize].to_vec());
    }

    let detail = format!("forward search exhausted {max} rounds without reaching ({n},{m})");
    error!(detail = %detail, "internal diff algorithm error");
    Err(DiffError::InternalAlgorithm { detail })
}

/// Walk the trace back from `(n, m)` to `(0, 0)`.
fn backtrack(
    trace: &[Vec<isize>],
    n: usize,
    m: usize,
    old_offset: usize,
    new_offset: usize,
) -> Result<Vec<Edit>, DiffError> {
    let internal = |detail: String| {
        error!(detail = %detail, n, m, "internal diff algorithm error");
        DiffError::InternalAlgorithm { detail }
    };

    let mut x = n as isize;
    let mut y = m as isize;
    let mut edits = Vec::with_capacity(n + m);
    let final_d = trace.len().saturating_sub(1);
    if final_d > n + m {
        return Err(internal(format!(
            "trace depth {final_d} exceeds bound {}",
            n + m
        )));
    }

    for d in (1..=final_d).rev() {
        let prev = &trace[d - 1];
        let prev_d = (d - 1) as isize;
        let lookup = |k: isize| -> Result<isize, DiffError> {
            usize::try_from(k + prev_d)
                .ok()
                .and_then(|i| prev.get(i).copied())
                .ok_or_else(|| internal(format!("diagonal {k} outside snapshot at d={}", d - 1)))
        };

        let d_i = d as isize;
        let k = x - y;
        if k.abs() > d_i {
            return Err(internal(format!("diagonal {k} unreachable at d={d}")));
        }
        let went_down = if k == -d_i {
            true
        } else if k == d_i {
            false
        } else {
            lookup(k - 1)? < lookup(k + 1)?
        };
        let prev_k = if went_down { k + 1 } else { k - 1 };
        let prev_x = lookup(prev_k)?;
        let prev_y = prev_x - prev_k;
        let (mid_x, mid_y) = if went_down {
            (prev_x, prev_y + 1)
        } else {
            (prev_x + 1, prev_y)
        };

        while x > mid_x && y > mid_y {
            x -= 1;
            y -= 1;
            edits.push(Edit::Equal {
                old: old_offset + x as usize,
                new: new_offset + y as usize,
            });
        }
        if x != mid_x || y != mid_y || prev_x < 0 || prev_y < 0 {
            return Err(internal(format!(
                "snake at d={d} ended at ({x},{y}), expected ({mid_x},{mid_y})"
            )));
        }

        if went_down {
            edits.push(Edit::Insert {
                new: new_offset + prev_y as usize,
            });
        } else {
            edits.push(Edit::Delete {
                old: old_offset + prev_x as usize,
            });
        }
        x = prev_x;
        y = prev_y;
    }

    while x > 0 && y > 0 {
        x -= 1;
        y -= 1;
        edits.push(Edit::Equal {
            old: old_offset + x as usize,
            new: new_offset + y as usize,
        });
    }
    if x != 0 || y != 0 {
        return Err(internal(format!(
            "backtrace did not terminate within {} rounds, stopped at ({x},{y})",
            n + m
        )));
    }

    edits.reverse();
    Ok(edits)
}

/// Turn the edit script into ordered [`DiffChange`] runs. Delete/insert
/// runs with no Equal between them become a single Modify.
fn build_changes(edits: &[Edit], old: &[Token], new: &[Token]) -> Vec<DiffChange> {
    let texts = |tokens: &[Token], range: Range<usize>| -> Vec<String> {
        tokens[range].iter().map(|t| t.text.clone()).collect()
    };

    let mut changes = Vec::new();
    let mut i = 0;
    let (mut old_pos, mut new_pos) = (0usize, 0usize);

    while i < edits.len() {
        if let Edit::Equal { .. } = edits[i] {
            let (old_start, new_start) = (old_pos, new_pos);
            while let Some(Edit::Equal { old, new }) = edits.get(i) {
                old_pos = old + 1;
                new_pos = new + 1;
                i += 1;
            }
            changes.push(DiffChange::equal(
                old_start,
                new_start,
                texts(old, old_start..old_pos),
                texts(new, new_start..new_pos),
            ));
            continue;
        }

        let (old_start, new_start) = (old_pos, new_pos);
        while let Some(edit) = edits.get(i) {
            match *edit {
                Edit::Delete { old } => old_pos = old + 1,
                Edit::Insert { new } => new_pos = new + 1,
                Edit::Equal { .. } => break,
            }
            i += 1;
        }

        let removed = texts(old, old_start..old_pos);
        let added = texts(new, new_start..new_pos);
        let change = match (removed.is_empty(), added.is_empty()) {
            (true, _) => DiffChange::insert(old_start, new_start, added),
            (false, true) => DiffChange::delete(old_start, new_start, removed),
            (false, false) => DiffChange::modify(old_start, new_start, removed, added),
        };
        changes.push(change);
    }

    if old_pos != old.len() || new_pos != new.len() {
        warn!(
            old_pos,
            new_pos,
            old_len = old.len(),
            new_len = new.len(),
            "edit script does not cover both sequences"
        );
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::diff::apply::apply_changes;
    use crate::models::{ChangeType, Granularity};

    fn engine() -> MyersDiffEngine {
        MyersDiffEngine::default()
    }

    fn tokens(content: &str) -> Vec<Token> {
        Tokenizer::tokenize(content, &DiffOptions::default())
    }

    fn lines(content: &str) -> Vec<String> {
        content.lines().map(String::from).collect()
    }

    fn diff(old: &str, new: &str) -> TextDiff {
        engine()
            .diff(
                &tokens(old),
                &tokens(new),
                &DiffOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap()
    }

    #[test]
    fn test_identical_inputs_have_no_edits() {
        let d = diff("a\nb\nc", "a\nb\nc");
        assert!(d.is_identical());
        assert_eq!(d.changes.len(), 1);
        assert_eq!(d.changes[0].change_type, ChangeType::Equal);
        assert_eq!(d.algorithm, ALGORITHM);
    }

    #[test]
    fn test_empty_inputs() {
        let d = diff("", "");
        assert!(d.changes.is_empty());
        assert!(d.is_identical());

        let d = diff("", "hello");
        assert_eq!(d.changes.len(), 1);
        assert_eq!(d.changes[0].change_type, ChangeType::Insert);
        assert_eq!(d.changes[0].content, vec!["hello"]);

        let d = diff("gone", "");
        assert_eq!(d.changes[0].change_type, ChangeType::Delete);
        assert_eq!(d.changes[0].old_lines, 1);
    }

    #[test]
    fn test_modify_collapses_delete_insert() {
        let d = diff("A\nB\nC", "A\nX\nC");
        let edits: Vec<_> = d.edits().collect();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].change_type, ChangeType::Modify);
        assert_eq!(edits[0].old_start, 1);
        assert_eq!(edits[0].old_lines, 1);
        assert_eq!(edits[0].content, vec!["X"]);
        assert_eq!(edits[0].old_content, vec!["B"]);
        assert_eq!(d.statistics.lines_modified, 1);
    }

    #[test]
    fn test_insert_position() {
        let d = diff("A\nB\nC", "A\nB\nY\nC");
        let edits: Vec<_> = d.edits().collect();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].change_type, ChangeType::Insert);
        assert_eq!(edits[0].old_start, 2);
        assert_eq!(edits[0].new_start, 2);
    }

    #[test]
    fn test_changes_ordered_and_covering() {
        let d = diff("a\nb\nc\nd\ne\nf", "a\nc\nd\nX\nf\ng");
        let mut old_pos = 0;
        let mut new_pos = 0;
        for change in &d.changes {
            assert_eq!(change.old_start, old_pos);
            assert_eq!(change.new_start, new_pos);
            old_pos += change.old_lines;
            new_pos += change.new_lines;
        }
        assert_eq!(old_pos, 6);
        assert_eq!(new_pos, 6);
    }

    #[test]
    fn test_apply_reproduces_new() {
        let cases = [
            ("a\nb\nc\nd", "d\nc\nb\na"),
            ("x\ny", "p\nx\nq\ny\nr"),
            ("one\ntwo\nthree", ""),
            ("abc\nabc\nabc", "abc\nxyz\nabc\nabc"),
        ];
        for (old, new) in cases {
            let d = diff(old, new);
            assert_eq!(apply_changes(&lines(old), &d.changes), lines(new), "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn test_minimal_edit_distance() {
        // LCS of abcabba / cbabac is 4 (e.g. "baba"), so D = 7 + 6 - 8 = 5.
        let old = "a\nb\nc\na\nb\nb\na";
        let new = "c\nb\na\nb\na\nc";
        assert_eq!(diff(old, new).edit_distance(), 5);
    }

    #[test]
    fn test_ignore_whitespace_equalizes() {
        let options = DiffOptions {
            ignore_whitespace: true,
            ..DiffOptions::default()
        };
        let old = Tokenizer::tokenize("a\n  b  \nc", &options);
        let new = Tokenizer::tokenize("a\nb\nc", &options);
        let d = engine()
            .diff(&old, &new, &options, &CancellationToken::new())
            .unwrap();
        assert!(d.is_identical());
        // Equal runs keep the new-side text.
        assert_eq!(d.changes[0].content, vec!["a", "b", "c"]);
        assert_eq!(d.changes[0].old_content, vec!["a", "  b  ", "c"]);
    }

    #[test]
    fn test_word_granularity() {
        let options = DiffOptions {
            granularity: Granularity::Word,
            ..DiffOptions::default()
        };
        let d = engine()
            .diff_text_with("the quick fox", "the slow fox", &options)
            .unwrap();
        let edits: Vec<_> = d.edits().collect();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].content, vec!["slow "]);
    }

    #[test]
    fn test_chunked_diff_is_correct() {
        let config = DiffConfig {
            chunk_threshold: 4,
            ..DiffConfig::default()
        };
        let engine = MyersDiffEngine::new(&config, Arc::new(NullAuditSink));
        let old = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10";
        let new = "1\n2\nx\n4\n5\n6\n7\n9\n10\n11\n12";
        let d = engine
            .diff(
                &tokens(old),
                &tokens(new),
                &DiffOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(d.algorithm, ALGORITHM_CHUNKED);
        assert_eq!(apply_changes(&lines(old), &d.changes), lines(new));
    }

    #[test]
    fn test_chunk_ranges_alignment() {
        let ranges = chunk_ranges(10, 3, 4);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], (0..4, 0..3));
        assert_eq!(ranges[1], (4..8, 3..3));
        assert_eq!(ranges[2], (8..10, 3..3));
    }

    #[test]
    fn test_cancelled_diff() {
        let token = CancellationToken::new();
        token.cancel();
        let result = engine().diff(
            &tokens("a\nb"),
            &tokens("c\nd"),
            &DiffOptions::default(),
            &token,
        );
        assert!(matches!(result, Err(DiffError::Cancelled { .. })));
    }

    #[test]
    fn test_timeout_diff() {
        let token = CancellationToken::with_timeout(std::time::Duration::ZERO);
        let result = engine().diff(
            &tokens("a\nb"),
            &tokens("c\nd"),
            &DiffOptions::default(),
            &token,
        );
        assert!(matches!(result, Err(DiffError::Timeout { .. })));
    }

    #[test]
    fn test_backtrack_rejects_corrupt_trace() {
        // A trace claiming the end was reached at d=0 for unequal inputs.
        let trace = vec![vec![0]];
        let result = backtrack(&trace, 2, 1, 0, 0);
        assert!(matches!(result, Err(DiffError::InternalAlgorithm { .. })));
    }

    #[test]
    fn test_diff_text_emits_audit_event() {
        let sink = Arc::new(MemoryAuditSink::new());
        let engine = MyersDiffEngine::new(&DiffConfig::default(), sink.clone());
        engine.diff_text("a\nb", "a\nc").unwrap();

        let events = sink.events_of(AuditEventType::DiffCalculated);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get("outcome"), Some(&"ok".into()));
        assert_eq!(events[0].get("total_changes"), Some(&1.into()));
    }
}
