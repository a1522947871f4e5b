//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use lotledger_infra::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Apply resolvable deductions on every sales snapshot. When off, the
    /// operator triggers `apply_pending_deductions` manually.
    pub auto_apply_deductions: bool,
    /// Resolve a sale line by product name alone when exactly one lot carries
    /// that name.
    pub allow_name_only_match: bool,
    /// Conflict retry budget for every engine transaction.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_apply_deductions: true,
            allow_name_only_match: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_auto_apply(mut self, enabled: bool) -> Self {
        self.auto_apply_deductions = enabled;
        self
    }

    pub fn with_name_only_match(mut self, enabled: bool) -> Self {
        self.allow_name_only_match = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Defaults overridden by `LOTLEDGER_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = parsed::<bool>(&lookup, "LOTLEDGER_AUTO_APPLY") {
            config.auto_apply_deductions = v;
        }
        if let Some(v) = parsed::<bool>(&lookup, "LOTLEDGER_NAME_ONLY_MATCH") {
            config.allow_name_only_match = v;
        }
        if let Some(v) = parsed::<u32>(&lookup, "LOTLEDGER_TX_MAX_ATTEMPTS") {
            config.retry.max_attempts = v;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "LOTLEDGER_TX_BASE_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
            config.retry.max_delay = config.retry.max_delay.max(config.retry.base_delay);
        }

        config
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}
