//! Exponential backoff with jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Backoff schedule for retrying transient backend failures.
///
/// How many retries happen is a property of the backend
/// (`BackendDescriptor::max_retries`); this only decides how long to wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth).
    pub max_delay_ms: u64,
    /// Backoff multiplier (2.0 for exponential backoff).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// Formula: min(base * multiplier^(retry - 1), max_delay) + jitter,
    /// where jitter is a random value between 0 and 10% of the delay.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let delay = (self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay_ms as f64);
        let jitter = delay * (rand::random::<f64>() * 0.1);
        Duration::from_millis((delay + jitter) as u64)
    }

    pub(crate) fn validate(&self, label: &str) -> Result<(), SearchError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SearchError::Config(format!(
                "{label}: backoff_multiplier must be at least 1.0"
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(SearchError::Config(format!(
                "{label}: base_delay_ms must be <= max_delay_ms"
            )));
        }
        Ok(())
    }
}
