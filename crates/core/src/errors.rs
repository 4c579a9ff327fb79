//! Error types for the docmerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`EngineError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse classification of an [`EngineError`], used by callers to route
/// failures (show a message, open a resolution workflow, page an operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-correctable input problem. Never retried automatically.
    Input,
    /// A human decision is required; not a failure of the system.
    Ambiguity,
    /// Algorithmic defect. Should never happen.
    Internal,
    /// Bad or missing configuration.
    Configuration,
}

impl EngineError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Diff(DiffError::InternalAlgorithm { .. }) => ErrorKind::Internal,
            Self::Diff(_) => ErrorKind::Input,
            Self::History(_) => ErrorKind::Input,
            Self::Merge(MergeError::Diff(DiffError::InternalAlgorithm { .. })) => {
                ErrorKind::Internal
            }
            Self::Merge(MergeError::UnresolvedConflicts { .. }) => ErrorKind::Ambiguity,
            Self::Merge(_) => ErrorKind::Input,
            Self::Resolution(
                ResolutionError::ManualResolutionRequired { .. }
                | ResolutionError::UserResolutionRequired { .. },
            ) => ErrorKind::Ambiguity,
            Self::Resolution(_) => ErrorKind::Input,
            Self::Config(_) => ErrorKind::Configuration,
        }
    }
}

// ---------------------------------------------------------------------------
// Diff errors
// ---------------------------------------------------------------------------

/// Errors from the tokenizer / Myers diff engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiffError {
    /// The configured deadline expired while searching the edit graph.
    #[error("diff timed out after {elapsed_ms}ms at edit distance {distance}")]
    Timeout { elapsed_ms: u64, distance: usize },

    /// The caller cancelled the diff.
    #[error("diff cancelled at edit distance {distance}")]
    Cancelled { distance: usize },

    /// The backtrace did not terminate. This is a bug, not a user error.
    #[error("internal diff algorithm error: {detail}")]
    InternalAlgorithm { detail: String },

    /// A delta does not fit the sequence it was applied to.
    #[error("delta does not apply: {detail}")]
    InvalidDelta { detail: String },
}

// ---------------------------------------------------------------------------
// Version history errors
// ---------------------------------------------------------------------------

/// Errors from version-graph traversal and the storage collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// The two versions share no ancestor (disjoint histories).
    #[error("no common ancestor between versions '{source_id}' and '{target_id}'")]
    NoCommonAncestor {
        source_id: String,
        target_id: String,
    },

    /// The version id is unknown to the graph accessor.
    #[error("version not found: {0}")]
    VersionNotFound(String),

    /// The storage collaborator could not supply a version's content.
    #[error("content unavailable for version '{version_id}': {detail}")]
    ContentUnavailable { version_id: String, detail: String },

    /// Octopus merge-base search is limited to 64 versions.
    #[error("merge-base search supports at most 64 versions, got {0}")]
    TooManyVersions(usize),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the three-way merge engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    /// One of the two diffs failed; the whole merge is aborted.
    #[error("merge aborted, diff failed: {0}")]
    Diff(#[from] DiffError),

    /// Final assembly was requested while conflicts are still open.
    #[error("{} conflict(s) still unresolved: {}", .ids.len(), .ids.join(", "))]
    UnresolvedConflicts { ids: Vec<String> },

    /// A partial-merge region refers to a conflict that was not supplied.
    #[error("partial merge references unknown conflict {0}")]
    UnknownConflict(String),
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Errors from conflict resolution. Scoped to a single conflict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// MANUAL_MERGE was requested without the required user input.
    #[error("conflict {conflict_id}: missing user input '{key}'")]
    MissingUserInput { conflict_id: String, key: String },

    /// The intelligent merge refused to guess.
    #[error("conflict {conflict_id} requires manual resolution: {reason}")]
    ManualResolutionRequired { conflict_id: String, reason: String },

    /// DEFER_TO_USER never auto-resolves.
    #[error("conflict {conflict_id} is deferred to the user")]
    UserResolutionRequired { conflict_id: String },

    /// Attempted to resolve a conflict that is already resolved.
    #[error("conflict {0} is already resolved")]
    AlreadyResolved(String),

    /// Attempted to reopen a conflict that has no resolution.
    #[error("conflict {0} is not resolved")]
    NotResolved(String),

    /// The requested conflict ID was not found.
    #[error("conflict not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
