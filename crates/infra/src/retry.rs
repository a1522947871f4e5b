//! Retry policy for optimistic transactions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use lotledger_core::TenantId;

use crate::store::{DocumentStore, StoreError};
use crate::transaction::Transaction;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    /// Conflicts clear as soon as the competing session commits, so the
    /// default backs off in milliseconds rather than seconds.
    fn default() -> Self {
        Self::exponential(8, Duration::from_millis(2), Duration::from_millis(250))
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay for a given retry number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => (base_ms * 2_f64.powi((attempt - 1) as i32)).min(max_ms),
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic spread so competing sessions do not retry in lockstep.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Check if more retries are allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_attempts
    }
}

/// Errors a transaction body may return.
///
/// The body's own error type must carry store errors through, and say which
/// of them are optimistic conflicts worth another attempt.
pub trait TransactionError: From<StoreError> {
    fn is_conflict(&self) -> bool;
}

impl TransactionError for StoreError {
    fn is_conflict(&self) -> bool {
        StoreError::is_conflict(self)
    }
}

/// Run `body` inside a fresh transaction and commit it, re-running the whole
/// body on optimistic conflict according to `policy`.
///
/// The body must be side-effect free outside the transaction: it runs again
/// from scratch on every retry. Exhausting the policy yields
/// `StoreError::RetriesExhausted` converted into `E`.
pub fn run_transaction<S, T, E, F>(store: &S, tenant_id: TenantId, policy: &RetryPolicy, mut body: F) -> Result<T, E>
where
    S: DocumentStore + ?Sized,
    E: TransactionError,
    F: FnMut(&mut Transaction<'_, S>) -> Result<T, E>,
{
    let mut retries = 0;

    loop {
        let mut tx = Transaction::new(store, tenant_id);
        let outcome = match body(&mut tx) {
            Ok(value) => tx.commit().map(|_| value).map_err(E::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() => {
                if !policy.should_retry(retries) {
                    tracing::warn!(tenant_id = %tenant_id, attempts = retries + 1, "transaction retries exhausted");
                    return Err(E::from(StoreError::RetriesExhausted { attempts: retries + 1 }));
                }
                retries += 1;
                let delay = policy.delay_for_attempt(retries);
                tracing::debug!(tenant_id = %tenant_id, retry = retries, delay_ms = delay.as_millis() as u64, "transaction conflict; retrying");
                std::thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
