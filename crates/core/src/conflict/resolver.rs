//! Conflict resolution actions.
//!
//! The [`ConflictResolver`] turns a conflict plus a named strategy into a
//! [`ConflictResolution`]: accept one side, take user-supplied content,
//! combine both sides when that is unambiguous, or defer to a person. Every
//! attempt is audited, successful or not.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use crate::errors::ResolutionError;
use crate::models::{
    ChangeType, ConflictResolution, ConflictType, DiffChange, MergeConflict, ResolutionStrategy,
};

/// `user_input` key holding MANUAL_MERGE content.
pub const CONTENT_KEY: &str = "content";

/// Conflict resolution operations. Holds only the audit sink.
pub struct ConflictResolver {
    audit: Arc<dyn AuditSink>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Arc::new(NullAuditSink))
    }
}

impl ConflictResolver {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    /// Compute a resolution without attaching it.
    pub fn resolve(
        &self,
        conflict: &MergeConflict,
        strategy: ResolutionStrategy,
        user_input: &BTreeMap<String, String>,
    ) -> Result<ConflictResolution, ResolutionError> {
        let result = compute(conflict, strategy, user_input);
        self.record(conflict, strategy, &result);
        result
    }

    /// Resolve `conflict` and attach the resolution to it.
    pub fn apply(
        &self,
        conflict: &mut MergeConflict,
        strategy: ResolutionStrategy,
        user_input: &BTreeMap<String, String>,
    ) -> Result<(), ResolutionError> {
        let result = if conflict.is_resolved() {
            Err(ResolutionError::AlreadyResolved(conflict.id.clone()))
        } else {
            compute(conflict, strategy, user_input)
        };
        self.record(conflict, strategy, &result);
        conflict.attach_resolution(result?)
    }

    /// Apply the detector's suggested strategy. A MANUAL_MERGE suggestion
    /// cannot be applied without user input and fails with
    /// `ManualResolutionRequired`.
    pub fn auto_resolve(&self, conflict: &mut MergeConflict) -> Result<(), ResolutionError> {
        let strategy = conflict.suggested_resolution.strategy;
        if strategy == ResolutionStrategy::ManualMerge {
            let err = ResolutionError::ManualResolutionRequired {
                conflict_id: conflict.id.clone(),
                reason: conflict.suggested_resolution.rationale.clone(),
            };
            let result: Result<ConflictResolution, _> = Err(err.clone());
            self.record(conflict, strategy, &result);
            return Err(err);
        }
        self.apply(conflict, strategy, &BTreeMap::new())
    }

    /// Withdraw a conflict's resolution so it can be resolved again.
    pub fn reopen(
        &self,
        conflict: &mut MergeConflict,
        reason: &str,
    ) -> Result<ConflictResolution, ResolutionError> {
        let previous = conflict.take_resolution()?;
        info!(
            conflict_id = %conflict.id,
            previous = %previous.strategy,
            reason,
            "conflict reopened"
        );
        self.audit.emit(
            AuditEvent::new(AuditEventType::ConflictReopened)
                .with("conflict_id", conflict.id.clone())
                .with("previous_strategy", previous.strategy.to_string())
                .with("reason", reason)
                .with("reopen_count", conflict.reopen_count),
        );
        Ok(previous)
    }

    fn record(
        &self,
        conflict: &MergeConflict,
        strategy: ResolutionStrategy,
        result: &Result<ConflictResolution, ResolutionError>,
    ) {
        let event = AuditEvent::new(AuditEventType::ConflictResolved)
            .with("conflict_id", conflict.id.clone())
            .with("conflict_type", conflict.conflict_type.to_string())
            .with("strategy", strategy.to_string())
            .with("automated", strategy != ResolutionStrategy::ManualMerge);
        let event = match result {
            Ok(resolution) => {
                info!(conflict_id = %conflict.id, %strategy, "conflict resolved");
                event
                    .with("outcome", "resolved")
                    .with("resolved_lines", resolution.resolved_content.len())
            }
            Err(e) => {
                warn!(conflict_id = %conflict.id, %strategy, error = %e, "conflict not resolved");
                event.with("outcome", "error").with("error", e.to_string())
            }
        };
        self.audit.emit(event);
    }
}

fn compute(
    conflict: &MergeConflict,
    strategy: ResolutionStrategy,
    user_input: &BTreeMap<String, String>,
) -> Result<ConflictResolution, ResolutionError> {
    let content = match strategy {
        ResolutionStrategy::AcceptSource => conflict.source_content.clone(),
        ResolutionStrategy::AcceptTarget => conflict.target_content.clone(),
        ResolutionStrategy::ManualMerge => user_input
            .get(CONTENT_KEY)
            .map(|c| c.lines().map(String::from).collect())
            .ok_or_else(|| ResolutionError::MissingUserInput {
                conflict_id: conflict.id.clone(),
                key: CONTENT_KEY.to_string(),
            })?,
        ResolutionStrategy::IntelligentMerge => {
            intelligent_merge(conflict).map_err(|reason| {
                ResolutionError::ManualResolutionRequired {
                    conflict_id: conflict.id.clone(),
                    reason,
                }
            })?
        }
        ResolutionStrategy::DeferToUser => {
            return Err(ResolutionError::UserResolutionRequired {
                conflict_id: conflict.id.clone(),
            })
        }
    };

    Ok(ConflictResolution {
        strategy,
        resolved_content: content,
        user_input: user_input.clone(),
        automated_applied: strategy != ResolutionStrategy::ManualMerge,
        resolved_at: Utc::now(),
    })
}

/// Combine both sides when the combination is unambiguous, otherwise return
/// the reason it is not.
fn intelligent_merge(conflict: &MergeConflict) -> Result<Vec<String>, String> {
    if matches!(
        conflict.conflict_type,
        ConflictType::MetadataConflict | ConflictType::PermissionConflict
    ) {
        return merge_metadata_values(conflict);
    }

    let source = conflict.source_changes.as_slice();
    let target = conflict.target_changes.as_slice();
    if source.is_empty() {
        return Ok(conflict.target_content.clone());
    }
    if target.is_empty() {
        return Ok(conflict.source_content.clone());
    }

    let pure = |changes: &[DiffChange]| changes.iter().all(|c| c.change_type == ChangeType::Insert);
    if !pure(source) || !pure(target) {
        return Err("both sides modify or delete content in the same range".into());
    }

    let anchors = |changes: &[DiffChange]| -> BTreeMap<usize, Vec<String>> {
        let mut map: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for c in changes {
            map.entry(c.old_start).or_default().extend(c.content.iter().cloned());
        }
        map
    };
    let source_at = anchors(source);
    let target_at = anchors(target);
    if !source_at.keys().eq(target_at.keys()) {
        return Err("insertions are anchored at different positions".into());
    }

    // Walk the base range, emitting source insertions then the target
    // insertions source lacks at each anchor.
    let start = conflict.conflict_range.start;
    let mut merged = Vec::new();
    for offset in 0..=conflict.base_content.len() {
        if let (Some(s), Some(t)) = (source_at.get(&(start + offset)), target_at.get(&(start + offset))) {
            merged.extend(s.iter().cloned());
            merged.extend(t.iter().filter(|line| !s.contains(line)).cloned());
        }
        if let Some(line) = conflict.base_content.get(offset) {
            merged.push(line.clone());
        }
    }
    debug!(conflict_id = %conflict.id, lines = merged.len(), "insertions combined");
    Ok(merged)
}

/// JSON objects merge key-wise when no key disagrees; arrays merge as an
/// order-preserving union. Anything else needs a person.
fn merge_metadata_values(conflict: &MergeConflict) -> Result<Vec<String>, String> {
    let parse = |content: &[String]| -> Option<Value> {
        content.first().and_then(|s| serde_json::from_str(s).ok())
    };
    let (Some(source), Some(target)) = (
        parse(&conflict.source_content),
        parse(&conflict.target_content),
    ) else {
        return Err("a side removed the value".into());
    };

    let merged = match (source, target) {
        (Value::Object(mut s), Value::Object(t)) => {
            for (key, value) in t {
                match s.get(&key) {
                    Some(existing) if *existing != value => {
                        return Err(format!("both sides set '{key}' differently"))
                    }
                    Some(_) => {}
                    None => {
                        s.insert(key, value);
                    }
                }
            }
            Value::Object(s)
        }
        (Value::Array(mut s), Value::Array(t)) => {
            let present: BTreeSet<String> = s.iter().map(Value::to_string).collect();
            s.extend(t.into_iter().filter(|v| !present.contains(&v.to_string())));
            Value::Array(s)
        }
        _ => return Err("values cannot be combined".into()),
    };
    Ok(vec![merged.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::conflict::ConflictDetector;
    use crate::conflict::MetadataConflictDetector;
    use crate::diff::MyersDiffEngine;
    use serde_json::json;

    fn conflict(base: &str, source: &str, target: &str) -> MergeConflict {
        let engine = MyersDiffEngine::default();
        let mut conflicts = ConflictDetector::default().detect_conflicts(
            &engine.diff_text(base, source).unwrap(),
            &engine.diff_text(base, target).unwrap(),
        );
        assert_eq!(conflicts.len(), 1);
        conflicts.remove(0)
    }

    fn input(content: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(CONTENT_KEY.to_string(), content.to_string())])
    }

    #[test]
    fn test_accept_sides() {
        let c = conflict("a\nb\nc", "a\nS\nc", "a\nT\nc");
        let resolver = ConflictResolver::default();
        let r = resolver
            .resolve(&c, ResolutionStrategy::AcceptSource, &BTreeMap::new())
            .unwrap();
        assert_eq!(r.resolved_content, vec!["S"]);
        assert!(r.automated_applied);
        let r = resolver
            .resolve(&c, ResolutionStrategy::AcceptTarget, &BTreeMap::new())
            .unwrap();
        assert_eq!(r.resolved_content, vec!["T"]);
    }

    #[test]
    fn test_repeated_resolution_is_deterministic() {
        let resolver = ConflictResolver::default();
        let replaced = conflict("a\nb\nc", "a\nS\nc", "a\nT\nc");
        let inserted = conflict("a\nb", "a\ns\nb", "a\nt\nb");
        let cases = [
            (&replaced, ResolutionStrategy::AcceptSource, BTreeMap::new()),
            (&replaced, ResolutionStrategy::AcceptTarget, BTreeMap::new()),
            (&inserted, ResolutionStrategy::IntelligentMerge, BTreeMap::new()),
            (&replaced, ResolutionStrategy::ManualMerge, input("S and T")),
        ];

        for (c, strategy, user_input) in cases {
            let first = resolver.resolve(c, strategy, &user_input).unwrap();
            let second = resolver.resolve(c, strategy, &user_input).unwrap();
            assert_eq!(first.resolved_content, second.resolved_content, "{strategy}");
            assert_eq!(first.strategy, second.strategy);
            assert_eq!(first.automated_applied, second.automated_applied);
            assert_eq!(first.user_input, second.user_input);
        }
    }

    #[test]
    fn test_manual_merge() {
        let c = conflict("a\nb\nc", "a\nS\nc", "a\nT\nc");
        let resolver = ConflictResolver::default();
        let r = resolver
            .resolve(&c, ResolutionStrategy::ManualMerge, &input("S and T\nmore"))
            .unwrap();
        assert_eq!(r.resolved_content, vec!["S and T", "more"]);
        assert!(!r.automated_applied);
        assert_eq!(r.user_input[CONTENT_KEY], "S and T\nmore");

        let err = resolver
            .resolve(&c, ResolutionStrategy::ManualMerge, &BTreeMap::new())
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::MissingUserInput {
                conflict_id: c.id.clone(),
                key: "content".into()
            }
        );
    }

    #[test]
    fn test_defer_to_user_never_resolves() {
        let c = conflict("a\nb", "a\nS", "a\nT");
        let err = ConflictResolver::default()
            .resolve(&c, ResolutionStrategy::DeferToUser, &input("x"))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::UserResolutionRequired { .. }));
    }

    #[test]
    fn test_intelligent_merge_of_insertions() {
        let c = conflict("a\nb", "a\nshared\nfrom source\nb", "a\nshared\nfrom target\nb");
        let r = ConflictResolver::default()
            .resolve(&c, ResolutionStrategy::IntelligentMerge, &BTreeMap::new())
            .unwrap();
        assert_eq!(r.resolved_content, vec!["shared", "from source", "from target"]);
    }

    #[test]
    fn test_intelligent_merge_refuses_overlapping_edits() {
        let c = conflict("a\nb\nc", "a\nS\nc", "a\nT\nc");
        let err = ConflictResolver::default()
            .resolve(&c, ResolutionStrategy::IntelligentMerge, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::ManualResolutionRequired { .. }
        ));
    }

    #[test]
    fn test_apply_and_reopen() {
        let sink = Arc::new(MemoryAuditSink::new());
        let resolver = ConflictResolver::new(sink.clone());
        let mut c = conflict("a\nb", "a\nS", "a\nT");

        resolver
            .apply(&mut c, ResolutionStrategy::AcceptTarget, &BTreeMap::new())
            .unwrap();
        assert!(c.is_resolved());

        let again = resolver.apply(&mut c, ResolutionStrategy::AcceptSource, &BTreeMap::new());
        assert_eq!(again, Err(ResolutionError::AlreadyResolved(c.id.clone())));

        let previous = resolver.reopen(&mut c, "reviewer disagreed").unwrap();
        assert_eq!(previous.strategy, ResolutionStrategy::AcceptTarget);
        assert!(!c.is_resolved());
        assert_eq!(c.reopen_count, 1);
        assert!(matches!(
            resolver.reopen(&mut c, "twice"),
            Err(ResolutionError::NotResolved(_))
        ));

        let resolved = sink.events_of(AuditEventType::ConflictResolved);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].get("outcome"), Some(&"resolved".into()));
        assert_eq!(resolved[1].get("outcome"), Some(&"error".into()));
        assert_eq!(sink.events_of(AuditEventType::ConflictReopened).len(), 1);
    }

    #[test]
    fn test_auto_resolve_follows_suggestion() {
        let resolver = ConflictResolver::default();

        let mut inserts = conflict("a\nb", "a\ns\nb", "a\nt\nb");
        resolver.auto_resolve(&mut inserts).unwrap();
        assert_eq!(
            inserts.resolution.as_ref().unwrap().resolved_content,
            vec!["s", "t"]
        );

        let mut edits = conflict("a\nb", "a\nS", "a\nT");
        assert!(matches!(
            resolver.auto_resolve(&mut edits),
            Err(ResolutionError::ManualResolutionRequired { .. })
        ));
        assert!(!edits.is_resolved());
    }

    #[test]
    fn test_metadata_values_combine() {
        let base = BTreeMap::from([("tags".to_string(), json!(["a"]))]);
        let source = BTreeMap::from([("tags".to_string(), json!(["a", "b"]))]);
        let target = BTreeMap::from([("tags".to_string(), json!(["a", "c"]))]);
        let mut conflicts = MetadataConflictDetector::detect(&base, &source, &target);
        let resolver = ConflictResolver::default();
        resolver.auto_resolve(&mut conflicts[0]).unwrap();
        let content = &conflicts[0].resolution.as_ref().unwrap().resolved_content;
        assert_eq!(
            serde_json::from_str::<Value>(&content[0]).unwrap(),
            json!(["a", "b", "c"])
        );

        let base = BTreeMap::from([("owner".to_string(), json!("ann"))]);
        let source = BTreeMap::from([("owner".to_string(), json!("bob"))]);
        let target = BTreeMap::from([("owner".to_string(), json!("cy"))]);
        let mut conflicts = MetadataConflictDetector::detect(&base, &source, &target);
        assert!(resolver.auto_resolve(&mut conflicts[0]).is_err());
    }
}
