//! TOML-based configuration for the docmerge engine.
//!
//! Every field has a default, so an empty file (or [`EngineConfig::default`])
//! yields a working engine.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::{DiffOptions, Granularity};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Tokenization and diff settings.
    #[serde(default)]
    pub diff: DiffConfig,

    /// Conflict grouping and severity thresholds.
    #[serde(default)]
    pub conflict: ConflictConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Diff engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffConfig {
    #[serde(default)]
    pub ignore_whitespace: bool,

    #[serde(default)]
    pub ignore_case: bool,

    /// Context lines around rendered hunks (default 3).
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,

    #[serde(default)]
    pub granularity: Granularity,

    /// Above this many tokens on either side, inputs are diffed in aligned
    /// chunks of this size (default 10 000).
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    /// Abort a single diff after this many milliseconds. Unset means no
    /// deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_context_lines() -> usize {
    3
}
fn default_chunk_threshold() -> usize {
    10_000
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            ignore_whitespace: false,
            ignore_case: false,
            context_lines: default_context_lines(),
            granularity: Granularity::default(),
            chunk_threshold: default_chunk_threshold(),
            timeout_ms: None,
        }
    }
}

impl DiffConfig {
    /// The per-call options derived from this configuration.
    pub fn options(&self) -> DiffOptions {
        DiffOptions {
            ignore_whitespace: self.ignore_whitespace,
            ignore_case: self.ignore_case,
            context_lines: self.context_lines,
            granularity: self.granularity,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Conflict detection
// ---------------------------------------------------------------------------

/// Conflict detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictConfig {
    /// Changes at most this many positions apart form one group (default 3).
    #[serde(default = "default_proximity_gap")]
    pub proximity_gap: usize,

    /// Conflict ranges longer than this are HIGH severity (default 10).
    #[serde(default = "default_high_severity_lines")]
    pub high_severity_lines: usize,

    /// Conflict ranges longer than this are CRITICAL severity (default 50).
    #[serde(default = "default_critical_severity_lines")]
    pub critical_severity_lines: usize,
}

fn default_proximity_gap() -> usize {
    3
}
fn default_high_severity_lines() -> usize {
    10
}
fn default_critical_severity_lines() -> usize {
    50
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            proximity_gap: default_proximity_gap(),
            high_severity_lines: default_high_severity_lines(),
            critical_severity_lines: default_critical_severity_lines(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. `info` or `docmerge_core=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Load an [`EngineConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that thresholds are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.diff.chunk_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "diff.chunk_threshold".into(),
                detail: "chunk threshold must be > 0".into(),
            });
        }
        if self.diff.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "diff.timeout_ms".into(),
                detail: "timeout must be > 0 when set".into(),
            });
        }
        if self.conflict.high_severity_lines >= self.conflict.critical_severity_lines {
            return Err(ConfigError::InvalidValue {
                field: "conflict.high_severity_lines".into(),
                detail: "must be lower than conflict.critical_severity_lines".into(),
            });
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: "log level must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
