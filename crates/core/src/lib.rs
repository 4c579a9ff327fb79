//! docmerge core library.
//!
//! This crate provides the components for versioned document merging:
//! tokenization and Myers diffing, merge-base search over a version DAG,
//! three-way merging with conflict detection, conflict resolution, and the
//! audit events emitted along the way.

pub mod audit;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod engine;
pub mod errors;
pub mod history;
pub mod logging;
pub mod models;
pub mod session;

// Re-exports for convenience.
pub use audit::{AuditEvent, AuditEventType, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::EngineConfig;
pub use conflict::{ConflictDetector, ConflictResolver, MergeResult, MergeStrategy, ThreeWayMerger};
pub use diff::{MyersDiffEngine, Tokenizer};
pub use engine::MergeEngine;
pub use errors::{EngineError, ErrorKind};
pub use history::{InMemoryVersionStore, MergeBaseResolver, VersionGraph, VersionStore};
pub use session::{MergeSession, MergedDocument, SessionStatus};
