//! Timeout, retry, circuit breaking and rate limiting around adapter calls.
//!
//! [`ResilienceController`] owns the mutable per-backend state (breaker and
//! token bucket) plus the global bucket. It is built once from configuration,
//! shared by every query, and can be reset for test isolation.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

use std::collections::HashMap;
use std::time::Duration;

use crate::adapter::SourceAdapter;
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::types::{BackendDescriptor, SearchQuery, SourceResult};
use circuit_breaker::{BackendHealth, CircuitBreaker, CircuitState};
use rate_limit::{acquire_all, TokenBucket};
use retry::RetryPolicy;

struct BackendGuard {
    descriptor: BackendDescriptor,
    breaker: CircuitBreaker,
    bucket: TokenBucket,
    retry: RetryPolicy,
}

/// Registry entry plus breaker health for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendInfo {
    pub descriptor: BackendDescriptor,
    pub health: BackendHealth,
}

/// Wraps adapter calls with the resilience policy of each backend.
pub struct ResilienceController {
    backends: HashMap<String, BackendGuard>,
    global: TokenBucket,
    grace: Duration,
}

impl ResilienceController {
    /// Build per-backend state for every configured backend.
    pub fn new(config: &SearchConfig) -> Self {
        let backends = config
            .backends
            .iter()
            .map(|backend| {
                let guard = BackendGuard {
                    descriptor: backend.descriptor(),
                    breaker: CircuitBreaker::new(&backend.name, backend.circuit_breaker.clone()),
                    bucket: TokenBucket::new(&backend.rate_limit),
                    retry: backend.retry.clone(),
                };
                (backend.name.clone(), guard)
            })
            .collect();
        Self {
            backends,
            global: TokenBucket::new(&config.global_rate_limit),
            grace: config.rate_limit_grace(),
        }
    }

    /// Issue `query` through `adapter` under `backend`'s policy.
    ///
    /// Transient failures (`Timeout`, `Unreachable`) are retried up to the
    /// backend's `max_retries` with exponential backoff. An open circuit
    /// short-circuits with [`SearchError::BackendUnavailable`] without calling
    /// the adapter.
    pub async fn call(
        &self,
        backend: &str,
        adapter: &dyn SourceAdapter,
        query: &SearchQuery,
    ) -> Result<Vec<SourceResult>, SearchError> {
        let guard = self
            .backends
            .get(backend)
            .ok_or_else(|| SearchError::Config(format!("{backend}: not registered")))?;

        let mut retries = 0;
        loop {
            match self.attempt(guard, adapter, query).await {
                Ok(results) => return Ok(results),
                Err(err) if err.is_transient() && retries < guard.descriptor.max_retries => {
                    retries += 1;
                    let delay = guard.retry.delay_for_retry(retries);
                    tracing::warn!(
                        backend,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient backend failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        guard: &BackendGuard,
        adapter: &dyn SourceAdapter,
        query: &SearchQuery,
    ) -> Result<Vec<SourceResult>, SearchError> {
        let name = guard.descriptor.name.as_str();
        let Some(permit) = guard.breaker.try_acquire() else {
            tracing::debug!(backend = name, "circuit open; short-circuiting");
            return Err(SearchError::BackendUnavailable(format!("{name}: circuit open")));
        };

        // Rate limiting says nothing about backend health; the unsettled
        // permit is simply released.
        acquire_all(name, &[&guard.bucket, &self.global], self.grace).await?;

        let timeout = guard.descriptor.timeout;
        let started = tokio::time::Instant::now();
        let outcome = match tokio::time::timeout(timeout, adapter.issue(query)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SearchError::Timeout(format!(
                "{name}: no answer within {}ms",
                timeout.as_millis()
            ))),
        };

        match &outcome {
            Ok(results) => {
                tracing::debug!(
                    backend = name,
                    count = results.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "backend call succeeded"
                );
                permit.success();
            }
            Err(err) if err.counts_as_failure() => permit.failure(),
            Err(_) => permit.release(),
        }
        outcome
    }

    /// Registry entry for `backend`.
    pub fn descriptor(&self, backend: &str) -> Option<&BackendDescriptor> {
        self.backends.get(backend).map(|guard| &guard.descriptor)
    }

    pub fn circuit_state(&self, backend: &str) -> Option<CircuitState> {
        self.backends.get(backend).map(|guard| guard.breaker.state())
    }

    pub fn health(&self, backend: &str) -> Option<BackendHealth> {
        self.backends.get(backend).map(|guard| guard.breaker.health())
    }

    /// Every registered backend, sorted by name.
    pub fn backend_info(&self) -> Vec<BackendInfo> {
        let mut info: Vec<BackendInfo> = self
            .backends
            .values()
            .map(|guard| BackendInfo {
                descriptor: guard.descriptor.clone(),
                health: guard.breaker.health(),
            })
            .collect();
        info.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        info
    }

    /// Close every circuit and refill every bucket.
    pub fn reset(&self) {
        for guard in self.backends.values() {
            guard.breaker.reset();
            guard.bucket.reset();
        }
        self.global.reset();
    }
}
