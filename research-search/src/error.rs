//! Error types for the research-search crate.
//!
//! Backend-level variants (`Timeout`, `RateLimited`, `MalformedResponse`,
//! `Unreachable`, `BackendUnavailable`) never cross the aggregator boundary;
//! they are folded into per-backend status labels. Only `Validation` and
//! `SearchFailed` reach callers of a search.

/// Errors that can occur during aggregated search operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    /// The query was rejected before any backend was contacted.
    #[error("invalid query: {0}")]
    Validation(String),

    /// A backend did not answer within its deadline.
    #[error("backend timed out: {0}")]
    Timeout(String),

    /// A rate limit (ours or the backend's) refused the call.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The backend answered with something that could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The backend could not be reached (connect failure, 5xx).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend's circuit breaker is open; no call was attempted.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// No selected backend produced a result.
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// Invalid search configuration.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP client construction failed.
    #[error("HTTP error: {0}")]
    Http(String),
}

impl SearchError {
    /// Whether a retry with backoff may succeed.
    ///
    /// Only `Timeout` and `Unreachable` are retried. `RateLimited` is left to
    /// the token buckets and `MalformedResponse` will not improve on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unreachable(_))
    }

    /// Whether this outcome counts against the backend's circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unreachable(_) | Self::MalformedResponse(_)
        )
    }

    /// Stable machine-readable kind, used in failure envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Unreachable(_) => "unreachable",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::SearchFailed(_) => "search_failed",
            Self::Config(_) => "config",
            Self::Http(_) => "http",
        }
    }
}

/// Convenience type alias for research-search results.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_validation() {
        let err = SearchError::Validation("query must be at least 3 characters".into());
        assert_eq!(
            err.to_string(),
            "invalid query: query must be at least 3 characters"
        );
    }

    #[test]
    fn display_backend_unavailable() {
        let err = SearchError::BackendUnavailable("arxiv: circuit open".into());
        assert_eq!(err.to_string(), "backend unavailable: arxiv: circuit open");
    }

    #[test]
    fn display_search_failed() {
        let err = SearchError::SearchFailed("duckduckgo: timed_out".into());
        assert_eq!(err.to_string(), "search failed: duckduckgo: timed_out");
    }

    #[test]
    fn only_timeout_and_unreachable_are_transient() {
        assert!(SearchError::Timeout("x".into()).is_transient());
        assert!(SearchError::Unreachable("x".into()).is_transient());
        assert!(!SearchError::RateLimited("x".into()).is_transient());
        assert!(!SearchError::MalformedResponse("x".into()).is_transient());
        assert!(!SearchError::BackendUnavailable("x".into()).is_transient());
    }

    #[test]
    fn rate_limiting_does_not_trip_breaker() {
        assert!(!SearchError::RateLimited("x".into()).counts_as_failure());
        assert!(!SearchError::BackendUnavailable("x".into()).counts_as_failure());
        assert!(SearchError::MalformedResponse("x".into()).counts_as_failure());
    }

    #[test]
    fn kinds_are_snake_case() {
        assert_eq!(SearchError::Validation(String::new()).kind(), "validation");
        assert_eq!(SearchError::SearchFailed(String::new()).kind(), "search_failed");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SearchError>();
    }
}
