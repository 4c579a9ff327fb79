//! End-to-end tests for the merge workflow.
//!
//! These tests exercise the public `MergeEngine` with an in-memory version
//! store and a recording audit sink. No filesystem or network access.

use std::collections::BTreeMap;
use std::sync::Arc;

use docmerge_core::audit::{AuditEventType, MemoryAuditSink};
use docmerge_core::config::EngineConfig;
use docmerge_core::conflict::{MergeResult, MergeStrategy};
use docmerge_core::errors::{EngineError, ErrorKind, HistoryError};
use docmerge_core::history::InMemoryVersionStore;
use docmerge_core::models::{ConflictType, ResolutionStrategy, Severity};
use docmerge_core::session::SessionStatus;
use docmerge_core::MergeEngine;

// ===========================================================================
// Helpers
// ===========================================================================

fn engine_with_sink() -> (MergeEngine, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new());
    let engine = MergeEngine::new(EngineConfig::default(), sink.clone()).unwrap();
    (engine, sink)
}

/// A contract with two branches off a shared root, plus an unrelated root.
fn contract_history() -> InMemoryVersionStore {
    const ROOT: &str = "# Agreement\nThe parties agree.\nPayment is due in 30 days.\n\
                        Delivery within a week.\nReturns accepted.\nWarranty of one year.\nSigned.\n";
    let mut store = InMemoryVersionStore::new();
    store
        .insert("root", &[], ROOT)
        .insert("legal", &["root"], ROOT.replace("30 days", "45 days"))
        .insert(
            "legal-2",
            &["legal"],
            format!("{}Witnessed.\n", ROOT.replace("30 days", "45 days")),
        )
        .insert("sales", &["root"], ROOT.replace("30 days", "15 days"))
        .insert("unrelated", &[], "something else\n");
    store
}

// ===========================================================================
// In-memory merges
// ===========================================================================

#[test]
fn test_non_overlapping_changes_merge_cleanly() {
    let (engine, sink) = engine_with_sink();
    let result = engine.merge("A\nB\nC", "A\nX\nC", "A\nB\nY\nC", MergeStrategy::Recursive);

    match result {
        MergeResult::Success {
            merged_content,
            applied_changes,
            forced_conflicts,
            ..
        } => {
            assert_eq!(merged_content, "A\nX\nY\nC");
            assert_eq!(applied_changes, 2);
            assert!(forced_conflicts.is_empty());
        }
        other => panic!("expected clean merge, got {other:?}"),
    }
    assert!(sink.events_of(AuditEventType::ConflictDetected).is_empty());
    assert_eq!(sink.events_of(AuditEventType::MergePerformed).len(), 1);
}

#[test]
fn test_overlapping_modification_conflicts() {
    let (engine, sink) = engine_with_sink();
    let result = engine.merge(
        "line1\nline2",
        "line1\nsourceEdit",
        "line1\ntargetEdit",
        MergeStrategy::Recursive,
    );

    let conflicts = result.conflicts();
    assert!(!result.is_success());
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::ContentOverlap);
    assert_eq!(conflict.severity, Severity::Low);
    assert_eq!(
        conflict.suggested_resolution.strategy,
        ResolutionStrategy::ManualMerge
    );
    assert_eq!(conflict.base_content, vec!["line2"]);
    assert_eq!(conflict.source_content, vec!["sourceEdit"]);
    assert_eq!(conflict.target_content, vec!["targetEdit"]);

    let detected = sink.events_of(AuditEventType::ConflictDetected);
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].get("conflict_count"), Some(&1.into()));
}

#[test]
fn test_creation_from_empty_base() {
    let (engine, _) = engine_with_sink();
    let result = engine.merge("", "hello", "", MergeStrategy::Recursive);
    assert_eq!(result.merged_content(), Some("hello"));
    assert!(result.conflicts().is_empty());
}

#[test]
fn test_heading_conflict_is_critical() {
    let (engine, _) = engine_with_sink();
    let result = engine.merge(
        "# Scope\nbody\n",
        "# Scope of work\nbody\n",
        "## Scope\nbody\n",
        MergeStrategy::Recursive,
    );
    let conflicts = result.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].severity, Severity::Critical);
    assert_eq!(conflicts[0].conflict_type, ConflictType::StructuralChange);
    assert!(conflicts[0].impact.structural);
}

#[test]
fn test_same_point_insertions_conflict_despite_nearby_edit() {
    let (engine, _) = engine_with_sink();
    let base = "a\nb\nc\nd\ne\nf";
    let source = "a\nS1\nb\nc\nS2\nd\ne\nf";
    let target = "a\nT\nb\nc\nd\ne\nf";

    let result = engine.merge(base, source, target, MergeStrategy::Recursive);
    assert!(!result.is_success());
    assert_eq!(result.merged_content(), None);
    assert_eq!(result.conflicts().len(), 1);

    match result {
        MergeResult::WithConflicts { partial_merge, .. } => {
            assert_eq!(partial_merge.content(), base);
        }
        other => panic!("expected conflicts, got {other:?}"),
    }
}

// ===========================================================================
// Sessions over stored versions
// ===========================================================================

#[test]
fn test_session_resolves_and_finalizes() {
    let (engine, sink) = engine_with_sink();
    let store = contract_history();

    let mut session = engine
        .open_session(&store, "legal-2", "sales", None, MergeStrategy::Recursive)
        .unwrap();
    assert_eq!(session.base_id(), "root");
    assert_eq!(session.status(), SessionStatus::AwaitingResolution);

    let id = session.pending()[0].id.clone();
    let mut input = BTreeMap::new();
    input.insert(
        "content".to_string(),
        "Payment is due in 30 days.".to_string(),
    );
    session
        .resolve(&id, ResolutionStrategy::ManualMerge, &input)
        .unwrap();
    assert_eq!(session.status(), SessionStatus::ReadyToFinalize);

    let doc = session.finalize().unwrap();
    assert!(doc.content.contains("Payment is due in 30 days.\n"));
    assert!(doc.content.ends_with("Signed.\nWitnessed.\n"));
    assert_eq!(doc.base_id, "root");
    assert_eq!(doc.conflicts.len(), 1);
    assert_eq!(
        doc.conflicts[0]
            .resolution
            .as_ref()
            .map(|r| r.automated_applied),
        Some(false)
    );

    let merges = sink.events_of(AuditEventType::MergePerformed);
    assert_eq!(merges.len(), 2);
    assert_eq!(merges[1].get("phase"), Some(&"finalized".into()));
    assert_eq!(sink.events_of(AuditEventType::ConflictResolved).len(), 1);
}

#[test]
fn test_session_intelligent_merge_of_insertions() {
    let (engine, _) = engine_with_sink();
    let mut store = InMemoryVersionStore::new();
    store
        .insert("v1", &[], "a\nb\n")
        .insert("v2", &["v1"], "a\ns\nb\n")
        .insert("v3", &["v1"], "a\nt\nb\n");

    let mut session = engine
        .open_session(&store, "v2", "v3", None, MergeStrategy::Recursive)
        .unwrap();
    assert_eq!(session.conflicts().len(), 1);
    assert_eq!(
        session.conflicts()[0].suggested_resolution.strategy,
        ResolutionStrategy::IntelligentMerge
    );

    assert!(session.auto_resolve_all().is_empty());
    assert_eq!(session.finalize().unwrap().content, "a\ns\nt\nb\n");
}

#[test]
fn test_session_force_strategy() {
    let (engine, _) = engine_with_sink();
    let store = contract_history();

    let session = engine
        .open_session(&store, "legal", "sales", None, MergeStrategy::Force)
        .unwrap();
    assert_eq!(session.status(), SessionStatus::Clean);
    assert_eq!(session.conflicts().len(), 1);

    let doc = session.finalize().unwrap();
    assert!(doc.content.contains("45 days"));
    assert!(!doc.content.contains("15 days"));
}

#[test]
fn test_disjoint_histories_are_rejected() {
    let (engine, _) = engine_with_sink();
    let store = contract_history();

    let err = engine
        .open_session(&store, "legal", "unrelated", None, MergeStrategy::Recursive)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        EngineError::History(HistoryError::NoCommonAncestor { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Input);
}
