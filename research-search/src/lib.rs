//! # research-search
//!
//! Multi-backend search aggregation for the research assistant.
//!
//! A single query fans out concurrently to several independent search
//! backends (DuckDuckGo Instant Answer, a SearX instance, arXiv). Their
//! answers are merged into one deduplicated, deterministically ranked list.
//!
//! ## Design
//!
//! - Every backend call goes through a circuit breaker, a token bucket
//!   (per backend plus one shared bucket) and a bounded retry loop
//! - The whole search is bounded by an aggregate deadline; slow backends are
//!   cancelled and reported as `timed_out`, the rest still answer
//! - Results sharing a normalised URL or a near-identical title are merged
//!   and scored by a weighted average of backend relevance
//! - Fused results are cached with a TTL and LRU eviction; concurrent
//!   identical queries share one backend round
//!
//! ## Security
//!
//! - No API keys and no network listeners
//! - Query text is logged only at trace level

pub mod adapter;
pub mod adapters;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod resilience;
pub mod service;
pub mod types;

pub use adapter::SourceAdapter;
pub use api::{ErrorResponse, SearchRequest, SearchResponse};
pub use config::{BackendConfig, MergeStrategy, SearchConfig};
pub use error::{Result, SearchError};
pub use service::{SearchOutcome, SearchService};
pub use types::{
    AggregateResult, BackendKind, BackendStatus, FusedResult, SearchFilters, SearchQuery,
    SourceResult,
};

/// Run one request against a freshly built service.
///
/// Convenience for one-off callers; long-lived hosts should keep a
/// [`SearchService`] so breaker state and the cache persist across calls.
///
/// # Errors
///
/// Returns [`SearchError::Config`] for an invalid `config`, otherwise the
/// same errors as [`SearchService::handle`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> research_search::Result<()> {
/// let config = research_search::SearchConfig::default();
/// let request = research_search::SearchRequest::new("protein folding");
/// let response = research_search::search(request, config).await?;
/// for item in &response.results {
///     println!("{}: {}", item.title, item.url);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn search(request: SearchRequest, config: SearchConfig) -> Result<SearchResponse> {
    let service = SearchService::new(config)?;
    let response = service.handle(request).await;
    service.shutdown();
    response
}
