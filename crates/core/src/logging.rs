//! Tracing subscriber setup for processes embedding the engine.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a `fmt` subscriber filtered by `level` (any `EnvFilter`
/// directive). An unparsable directive falls back to `info`.
///
/// Returns `false` when a global subscriber was already installed, which
/// makes repeated calls (e.g. from several tests) harmless.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .try_init()
        .is_ok()
}

/// [`init_logging`] driven by the `[logging]` config section.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    init_logging(&config.level)
}
