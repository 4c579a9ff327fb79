//! Conflicts between document metadata maps.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::debug;

use crate::models::{
    Confidence, ConflictImpact, ConflictRange, ConflictType, MergeConflict, ResolutionStrategy,
    Severity, SuggestedResolution,
};

/// Metadata is a flat map of JSON values.
pub type Metadata = BTreeMap<String, Value>;

/// Keys under these prefixes control access and raise permission conflicts.
const PERMISSION_PREFIXES: &[&str] = &["permissions", "acl"];

/// Three-way comparison of metadata maps.
pub struct MetadataConflictDetector;

impl MetadataConflictDetector {
    /// A conflict for every key both sides changed to different values. A
    /// removed key counts as a change to "absent".
    ///
    /// Conflict ranges are meaningless for metadata and are left at `0..0`;
    /// the key is recorded in `base_content[0]` and the rendered values in
    /// the side contents.
    pub fn detect(base: &Metadata, source: &Metadata, target: &Metadata) -> Vec<MergeConflict> {
        let keys: BTreeSet<&String> = base.keys().chain(source.keys()).chain(target.keys()).collect();

        keys.into_iter()
            .filter_map(|key| {
                let (b, s, t) = (base.get(key), source.get(key), target.get(key));
                if s == b || t == b || s == t {
                    return None;
                }

                let permission = is_permission_key(key);
                let (conflict_type, severity, suggestion) = if permission {
                    (
                        ConflictType::PermissionConflict,
                        Severity::High,
                        SuggestedResolution {
                            strategy: ResolutionStrategy::ManualMerge,
                            confidence: Confidence::High,
                            rationale: format!("access control key '{key}' changed on both sides"),
                        },
                    )
                } else {
                    (
                        ConflictType::MetadataConflict,
                        Severity::Medium,
                        SuggestedResolution {
                            strategy: ResolutionStrategy::IntelligentMerge,
                            confidence: Confidence::Low,
                            rationale: format!("metadata key '{key}' changed on both sides"),
                        },
                    )
                };

                let mut conflict =
                    MergeConflict::new(conflict_type, ConflictRange { start: 0, end: 0 }, suggestion);
                conflict.severity = severity;
                conflict.base_content = vec![key.clone()];
                conflict.source_content = render(s);
                conflict.target_content = render(t);
                conflict.impact = ConflictImpact {
                    base_lines: usize::from(b.is_some()),
                    source_lines: usize::from(s.is_some()),
                    target_lines: usize::from(t.is_some()),
                    structural: false,
                };
                debug!(key = %key, conflict_type = %conflict.conflict_type, "metadata conflict");
                Some(conflict)
            })
            .collect()
    }

    /// Merge metadata where the sides do not conflict: keys changed on one
    /// side take that side's value, keys changed identically on both are
    /// kept. Conflicting keys keep the base value.
    pub fn merge(base: &Metadata, source: &Metadata, target: &Metadata) -> Metadata {
        let keys: BTreeSet<&String> = base.keys().chain(source.keys()).chain(target.keys()).collect();
        let mut merged = Metadata::new();
        for key in keys {
            let (b, s, t) = (base.get(key), source.get(key), target.get(key));
            let value = if s == b {
                t
            } else if t == b || s == t {
                s
            } else {
                b
            };
            if let Some(v) = value {
                merged.insert(key.clone(), v.clone());
            }
        }
        merged
    }
}

fn is_permission_key(key: &str) -> bool {
    PERMISSION_PREFIXES.iter().any(|prefix| {
        key == *prefix
            || key
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('/'))
    })
}

fn render(value: Option<&Value>) -> Vec<String> {
    value.map(|v| vec![v.to_string()]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_one_sided_changes_do_not_conflict() {
        let base = meta(&[("title", json!("Lease")), ("pages", json!(3))]);
        let source = meta(&[("title", json!("Lease v2")), ("pages", json!(3))]);
        let target = meta(&[("title", json!("Lease")), ("pages", json!(4))]);
        assert!(MetadataConflictDetector::detect(&base, &source, &target).is_empty());

        let merged = MetadataConflictDetector::merge(&base, &source, &target);
        assert_eq!(merged["title"], json!("Lease v2"));
        assert_eq!(merged["pages"], json!(4));
    }

    #[test]
    fn test_divergent_values_conflict() {
        let base = meta(&[("status", json!("draft"))]);
        let source = meta(&[("status", json!("review"))]);
        let target = meta(&[("status", json!("final"))]);
        let conflicts = MetadataConflictDetector::detect(&base, &source, &target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::MetadataConflict);
        assert_eq!(conflicts[0].base_content, vec!["status"]);
        assert_eq!(conflicts[0].source_content, vec!["\"review\""]);

        // The conflicting key keeps its base value.
        let merged = MetadataConflictDetector::merge(&base, &source, &target);
        assert_eq!(merged["status"], json!("draft"));
    }

    #[test]
    fn test_permission_keys() {
        let base = meta(&[("acl.readers", json!(["a"]))]);
        let source = meta(&[("acl.readers", json!(["a", "b"]))]);
        let target = meta(&[]);
        let conflicts = MetadataConflictDetector::detect(&base, &source, &target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::PermissionConflict);
        assert_eq!(
            conflicts[0].suggested_resolution.strategy,
            ResolutionStrategy::ManualMerge
        );
        assert!(conflicts[0].target_content.is_empty());

        assert!(is_permission_key("permissions"));
        assert!(is_permission_key("permissions/edit"));
        assert!(!is_permission_key("aclaim"));
    }

    #[test]
    fn test_both_added_same_value() {
        let base = Metadata::new();
        let source = meta(&[("tag", json!("urgent"))]);
        let target = meta(&[("tag", json!("urgent"))]);
        assert!(MetadataConflictDetector::detect(&base, &source, &target).is_empty());
        assert_eq!(
            MetadataConflictDetector::merge(&base, &source, &target)["tag"],
            json!("urgent")
        );
    }
}
