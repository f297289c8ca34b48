//! Concurrent fan-out under an aggregate deadline.
//!
//! [`Aggregator::search`] spawns one task per selected backend, each running
//! the resilience-wrapped adapter call. Tasks share one cancellation token
//! tied to the deadline: when it fires, still-running calls are cancelled and
//! their backends reported as `timed_out`. Only a search in which no backend
//! succeeded fails.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::fusion::{fuse, BackendBatch};
use crate::adapter::SourceAdapter;
use crate::config::MergeStrategy;
use crate::error::SearchError;
use crate::resilience::ResilienceController;
use crate::types::{AggregateResult, BackendDescriptor, BackendStatus, SearchQuery, SourceResult};

/// One entry of the backend registry.
#[derive(Clone)]
pub struct RegisteredBackend {
    pub descriptor: BackendDescriptor,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl std::fmt::Debug for RegisteredBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBackend")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Fans queries out to the registered backends and fuses what comes back.
///
/// The registry is read-only after construction.
pub struct Aggregator {
    registry: BTreeMap<String, RegisteredBackend>,
    resilience: Arc<ResilienceController>,
    deadline: Duration,
    strategy: MergeStrategy,
}

type TaskOutcome = (String, Result<Vec<SourceResult>, SearchError>);

impl Aggregator {
    pub fn new(
        registry: Vec<RegisteredBackend>,
        resilience: Arc<ResilienceController>,
        deadline: Duration,
        strategy: MergeStrategy,
    ) -> Self {
        let registry = registry
            .into_iter()
            .map(|backend| (backend.descriptor.name.clone(), backend))
            .collect();
        Self {
            registry,
            resilience,
            deadline,
            strategy,
        }
    }

    /// Names of every enabled backend.
    pub fn enabled_backends(&self) -> Vec<String> {
        self.registry
            .values()
            .filter(|b| b.descriptor.enabled)
            .map(|b| b.descriptor.name.clone())
            .collect()
    }

    /// Backends in `query.sources` that are registered and enabled.
    ///
    /// Unknown or disabled names are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Validation`] if nothing remains.
    pub fn select(&self, query: &SearchQuery) -> Result<Vec<&RegisteredBackend>, SearchError> {
        let mut selected = Vec::new();
        for name in query.sources() {
            match self.registry.get(name) {
                Some(backend) if backend.descriptor.enabled => selected.push(backend),
                Some(_) => tracing::debug!(backend = %name, "requested backend is disabled"),
                None => tracing::debug!(backend = %name, "requested backend is unknown"),
            }
        }
        if selected.is_empty() {
            let requested: Vec<&str> = query.sources().iter().map(String::as_str).collect();
            return Err(SearchError::Validation(format!(
                "no enabled backend among requested sources: {}",
                requested.join(", ")
            )));
        }
        Ok(selected)
    }

    /// Run `query` and return at most `query.max_results()` fused results.
    ///
    /// # Errors
    ///
    /// [`SearchError::Validation`] if no requested backend is available and
    /// [`SearchError::SearchFailed`] if every selected backend failed.
    pub async fn search(&self, query: &SearchQuery) -> Result<AggregateResult, SearchError> {
        let aggregate = self.search_untruncated(query).await?;
        Ok(aggregate.truncated(query.max_results()))
    }

    /// Like [`search`](Self::search) but returns the full fused list.
    pub async fn search_untruncated(
        &self,
        query: &SearchQuery,
    ) -> Result<AggregateResult, SearchError> {
        let selected = self.select(query)?;
        let started = tokio::time::Instant::now();
        let deadline = started + self.deadline;
        let cancel = CancellationToken::new();

        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        for backend in &selected {
            let name = backend.descriptor.name.clone();
            let adapter = Arc::clone(&backend.adapter);
            let resilience = Arc::clone(&self.resilience);
            let query = query.clone();
            let token = cancel.clone();
            tasks.spawn(async move {
                let call = AssertUnwindSafe(resilience.call(&name, adapter.as_ref(), &query))
                    .catch_unwind();
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(SearchError::Timeout(format!(
                        "{name}: cancelled at aggregate deadline"
                    ))),
                    outcome = call => outcome.unwrap_or_else(|_| {
                        Err(SearchError::MalformedResponse(format!("{name}: adapter panicked")))
                    }),
                };
                (name, outcome)
            });
        }

        let mut backend_status = BTreeMap::new();
        let mut batches = Vec::new();
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((name, Ok(results))))) => {
                    tracing::debug!(backend = %name, count = results.len(), "backend answered");
                    let weight = self
                        .registry
                        .get(&name)
                        .map_or(0.0, |b| b.descriptor.weight);
                    backend_status.insert(name.clone(), BackendStatus::Ok);
                    batches.push(BackendBatch {
                        backend: name,
                        weight,
                        results,
                    });
                }
                Ok(Some(Ok((name, Err(err))))) => {
                    tracing::warn!(backend = %name, error = %err, "backend failed");
                    backend_status.insert(name, BackendStatus::from(&err));
                }
                Ok(Some(Err(join_err))) => {
                    tracing::warn!(error = %join_err, "backend task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    break;
                }
            }
        }

        if deadline_hit {
            cancel.cancel();
            tasks.shutdown().await;
        }
        for backend in &selected {
            let name = &backend.descriptor.name;
            if !backend_status.contains_key(name) {
                let status = if deadline_hit {
                    BackendStatus::TimedOut
                } else {
                    BackendStatus::Error
                };
                if deadline_hit {
                    tracing::warn!(backend = %name, "backend cancelled at aggregate deadline");
                }
                backend_status.insert(name.clone(), status);
            }
        }

        if batches.is_empty() {
            let summary: Vec<String> = backend_status
                .iter()
                .map(|(name, status)| format!("{name}: {status}"))
                .collect();
            tracing::warn!(backends = %summary.join(", "), "every backend failed");
            return Err(SearchError::SearchFailed(summary.join(", ")));
        }

        let fused_results = fuse(&batches, query.filters(), self.strategy);
        tracing::info!(
            backends = selected.len(),
            succeeded = batches.len(),
            results = fused_results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregated search complete"
        );
        Ok(AggregateResult {
            fused_results,
            backend_status,
        })
    }
}
