//! Tracing/logging initialization.

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event (default; what log shippers expect).
    #[default]
    Json,
    /// Single-line human-readable output for local development.
    Compact,
    /// Multi-field human-readable output.
    Full,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            "full" | "text" => Ok(LogFormat::Full),
            other => bail!("unknown log format {other:?} (expected json, compact or full)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive, e.g. `info,lotledger_reconciliation=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl ObservabilityConfig {
    /// Read `RUST_LOG` and `LOTLEDGER_LOG_FORMAT`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                config.filter = filter;
            }
        }
        if let Ok(format) = std::env::var("LOTLEDGER_LOG_FORMAT") {
            config.format = format.parse().context("LOTLEDGER_LOG_FORMAT")?;
        }
        Ok(config)
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt().with_env_filter(filter).compact().try_init(),
        LogFormat::Full => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
}
