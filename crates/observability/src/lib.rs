//! Tracing/logging setup shared by every process hosting the engine.

/// Initialize process-wide observability from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
/// A malformed `LOTLEDGER_LOG_FORMAT` falls back to the defaults.
pub fn init() {
    let config = ObservabilityConfig::from_env().unwrap_or_else(|e| {
        eprintln!("invalid observability config, using defaults: {e:#}");
        ObservabilityConfig::default()
    });
    tracing::init_with(&config);
}

pub use self::tracing::{LogFormat, ObservabilityConfig, init_with};

/// Tracing configuration (filters, formats).
pub mod tracing;
