//! The [`MergeEngine`] ties the diff, merge and resolution components to one
//! configuration and one audit sink.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditSink, NullAuditSink};
use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, MergeResult, MergeStrategy, ThreeWayMerger};
use crate::diff::MyersDiffEngine;
use crate::errors::{ConfigError, DiffError, EngineError};
use crate::history::VersionStore;
use crate::models::TextDiff;
use crate::session::MergeSession;

/// Entry point for embedding callers.
///
/// Stateless apart from configuration: every operation can run concurrently
/// from any number of threads.
pub struct MergeEngine {
    config: EngineConfig,
    audit: Arc<dyn AuditSink>,
    differ: MyersDiffEngine,
    merger: ThreeWayMerger,
    resolver: ConflictResolver,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::build(EngineConfig::default(), Arc::new(NullAuditSink))
    }
}

impl MergeEngine {
    /// Create an engine after validating `config`.
    pub fn new(config: EngineConfig, audit: Arc<dyn AuditSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, audit))
    }

    /// Load, validate and build from a TOML file.
    pub fn from_config_file<P: AsRef<Path>>(
        path: P,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        let config = EngineConfig::load_and_validate(path)?;
        Ok(Self::build(config, audit))
    }

    fn build(config: EngineConfig, audit: Arc<dyn AuditSink>) -> Self {
        info!(
            granularity = %config.diff.granularity,
            chunk_threshold = config.diff.chunk_threshold,
            timeout_ms = ?config.diff.timeout_ms,
            "initializing merge engine"
        );
        Self {
            differ: MyersDiffEngine::new(&config.diff, audit.clone()),
            merger: ThreeWayMerger::new(&config, audit.clone()),
            resolver: ConflictResolver::new(audit.clone()),
            config,
            audit,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn differ(&self) -> &MyersDiffEngine {
        &self.differ
    }

    pub fn merger(&self) -> &ThreeWayMerger {
        &self.merger
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Diff two texts with the configured options.
    pub fn diff_text(&self, old: &str, new: &str) -> Result<TextDiff, DiffError> {
        self.differ.diff_text(old, new)
    }

    /// Three-way merge of in-memory texts.
    pub fn merge(
        &self,
        base: &str,
        source: &str,
        target: &str,
        strategy: MergeStrategy,
    ) -> MergeResult {
        self.merger.merge(base, source, target, strategy)
    }

    /// Start a merge of two stored versions. See [`MergeSession::open`].
    pub fn open_session<S: VersionStore>(
        &self,
        store: &S,
        source_id: &str,
        target_id: &str,
        base_id: Option<&str>,
        strategy: MergeStrategy,
    ) -> Result<MergeSession<'_>, EngineError> {
        MergeSession::open(self, store, source_id, target_id, base_id, strategy)
    }
}
