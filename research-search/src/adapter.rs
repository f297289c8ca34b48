//! Uniform query interface for search backends.
//!
//! Each backend (DuckDuckGo, SearX, arXiv) implements [`SourceAdapter`] so the
//! aggregator can fan a query out without knowing any wire protocol.

use async_trait::async_trait;

use crate::error::SearchError;
use crate::types::{SearchQuery, SourceResult};

/// One search backend.
///
/// Implementors turn a validated [`SearchQuery`] into a single outbound call
/// and reduce the backend's answer to [`SourceResult`] values. Each adapter
/// handles its own:
///
/// - URL construction with query encoding
/// - HTTP request with appropriate headers
/// - response decoding
/// - classification of failures into [`SearchError`] variants
///
/// Adapters never retry; retry, timeouts, rate limiting and circuit breaking
/// are applied around them by the resilience controller. Dropping the
/// returned future must abort the in-flight request.
///
/// All implementations must be `Send + Sync` for concurrent backend queries.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Issue one query against the backend.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Timeout`], [`SearchError::RateLimited`],
    /// [`SearchError::MalformedResponse`] or [`SearchError::Unreachable`].
    async fn issue(&self, query: &SearchQuery) -> Result<Vec<SourceResult>, SearchError>;
}
