//! Search front door: cache, then single-flight aggregation.
//!
//! [`SearchService`] owns every stateful component (resilience state, backend
//! registry, result cache) for the lifetime of the process. Nothing here is
//! global; tests build their own service and reset it between cases.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::SourceAdapter;
use crate::adapters::build_adapter;
use crate::api::{ResultItem, SearchRequest, SearchResponse};
use crate::cache::{CacheKey, CacheLayer, CacheStats};
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::http;
use crate::orchestrator::{Aggregator, RegisteredBackend};
use crate::resilience::{BackendInfo, ResilienceController};
use crate::types::{AggregateResult, SearchQuery};

/// Result of [`SearchService::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Fused results truncated to the query's `max_results`, plus the status
    /// of every dispatched backend.
    pub aggregate: AggregateResult,
    /// Served from the cache without running the aggregator for this call.
    pub cached: bool,
}

/// Aggregated search over the configured backends.
pub struct SearchService {
    resilience: Arc<ResilienceController>,
    aggregator: Aggregator,
    cache: Option<CacheLayer>,
}

impl SearchService {
    /// Build a service with one HTTP adapter per configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] for invalid configuration and
    /// [`SearchError::Http`] if the HTTP client cannot be built.
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let client = http::build_client(config.user_agent.as_deref())?;
        let mut adapters = HashMap::new();
        for backend in &config.backends {
            adapters.insert(backend.name.clone(), build_adapter(backend, client.clone())?);
        }
        Self::with_adapters(config, adapters)
    }

    /// Build a service around pre-built adapters, keyed by backend name.
    ///
    /// Every configured backend needs an adapter; extra adapters are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] for invalid configuration or a
    /// backend without an adapter.
    pub fn with_adapters(
        config: SearchConfig,
        mut adapters: HashMap<String, Arc<dyn SourceAdapter>>,
    ) -> Result<Self, SearchError> {
        config.validate()?;

        let mut registry = Vec::with_capacity(config.backends.len());
        for backend in &config.backends {
            let adapter = adapters.remove(&backend.name).ok_or_else(|| {
                SearchError::Config(format!("{}: no adapter provided", backend.name))
            })?;
            registry.push(RegisteredBackend {
                descriptor: backend.descriptor(),
                adapter,
            });
        }

        let resilience = Arc::new(ResilienceController::new(&config));
        let aggregator = Aggregator::new(
            registry,
            Arc::clone(&resilience),
            config.aggregate_deadline(),
            config.merge_strategy,
        );

        let cache = (config.cache_ttl_secs > 0).then(|| {
            let cache = CacheLayer::new(config.cache_capacity, config.cache_ttl());
            cache.spawn_sweeper(std::time::Duration::from_secs(
                config.cache_sweep_interval_secs,
            ));
            cache
        });

        tracing::info!(
            backends = ?aggregator.enabled_backends(),
            cache = cache.is_some(),
            "search service ready"
        );
        Ok(Self {
            resilience,
            aggregator,
            cache,
        })
    }

    /// Names of the backends a request without `sources` queries.
    pub fn enabled_backends(&self) -> Vec<String> {
        self.aggregator.enabled_backends()
    }

    pub fn resilience(&self) -> &ResilienceController {
        &self.resilience
    }

    /// The result cache, absent when `cache_ttl_secs` is 0.
    pub fn cache(&self) -> Option<&CacheLayer> {
        self.cache.as_ref()
    }

    /// Cache counters; all zero when caching is disabled.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.as_ref().map(CacheLayer::stats).unwrap_or_default()
    }

    /// Configuration and breaker health of every registered backend.
    pub fn backend_info(&self) -> Vec<BackendInfo> {
        self.resilience.backend_info()
    }

    /// Run a validated query, serving it from the cache when possible.
    ///
    /// # Errors
    ///
    /// [`SearchError::Validation`] if no requested backend is available and
    /// [`SearchError::SearchFailed`] if every selected backend failed.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchOutcome, SearchError> {
        tracing::trace!(query = query.text(), request_id = %query.request_id(), "search");

        let Some(cache) = &self.cache else {
            return self.uncached(query).await;
        };
        let key = match CacheKey::for_query(query) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = %err, "cache bypassed");
                return self.uncached(query).await;
            }
        };

        let lookup = cache
            .get_or_compute(key, query.max_results(), || {
                self.aggregator.search_untruncated(query)
            })
            .await?;
        Ok(SearchOutcome {
            aggregate: lookup
                .entry
                .aggregate()
                .clone()
                .truncated(query.max_results()),
            cached: lookup.cached,
        })
    }

    async fn uncached(&self, query: &SearchQuery) -> Result<SearchOutcome, SearchError> {
        Ok(SearchOutcome {
            aggregate: self.aggregator.search(query).await?,
            cached: false,
        })
    }

    /// Validate a wire request, run it and build the response.
    ///
    /// # Errors
    ///
    /// Same as [`search`](Self::search), plus [`SearchError::Validation`]
    /// for a malformed request.
    pub async fn handle(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        let started = std::time::Instant::now();
        let query = request.into_query(&self.enabled_backends())?;
        let outcome = self.search(&query).await?;

        let results: Vec<ResultItem> = outcome
            .aggregate
            .fused_results
            .iter()
            .map(ResultItem::from)
            .collect();
        let response = SearchResponse {
            total_results: results.len(),
            results,
            search_time: started.elapsed().as_secs_f64(),
            backend_status: outcome.aggregate.backend_status,
            cached: outcome.cached,
            request_id: query.request_id(),
        };
        tracing::info!(
            request_id = %response.request_id,
            results = response.total_results,
            cached = response.cached,
            search_time = response.search_time,
            "request served"
        );
        Ok(response)
    }

    /// Close every circuit, refill every bucket and empty the cache.
    pub async fn reset(&self) {
        self.resilience.reset();
        if let Some(cache) = &self.cache {
            cache.reset().await;
        }
    }

    /// Stop background work.
    pub fn shutdown(&self) {
        if let Some(cache) = &self.cache {
            cache.shutdown();
        }
    }
}
