//! Request and response wire shapes exchanged with the API layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SearchError;
use crate::types::{BackendStatus, FusedResult, SearchFilters, SearchQuery};

fn default_max_results() -> usize {
    10
}

/// Incoming search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Backend names to query. Empty means every enabled backend.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    /// Request with default limits, querying every enabled backend.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: default_max_results(),
            sources: Vec::new(),
            filters: SearchFilters::default(),
        }
    }

    /// Validate into a [`SearchQuery`]. `default_sources` fills an empty
    /// `sources` list.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Validation`] for any invalid field.
    pub fn into_query(self, default_sources: &[String]) -> Result<SearchQuery, SearchError> {
        let sources = if self.sources.is_empty() {
            default_sources.to_vec()
        } else {
            self.sources
        };
        SearchQuery::new(&self.query, self.max_results, sources, self.filters)
    }
}

/// Per-result metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub rank: usize,
    pub merged_from: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub authors: Vec<String>,
}

/// One ranked result in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
    pub relevance_score: f64,
    pub metadata: ResultMetadata,
}

impl From<&FusedResult> for ResultItem {
    fn from(result: &FusedResult) -> Self {
        Self {
            title: result.title.clone(),
            url: result.url.clone(),
            snippet: result.snippet.clone(),
            source: result.source.clone(),
            relevance_score: result.normalized_score,
            metadata: ResultMetadata {
                rank: result.rank,
                merged_from: result.merged_from.clone(),
                published_date: result.published_date,
                authors: result.authors.clone(),
            },
        }
    }
}

/// Successful search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<ResultItem>,
    pub total_results: usize,
    /// Wall-clock seconds spent serving the request.
    pub search_time: f64,
    pub backend_status: BTreeMap<String, BackendStatus>,
    pub cached: bool,
    pub request_id: Uuid,
}

/// Body of a failure envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable kind, e.g. `validation` or `search_failed`.
    pub kind: String,
    pub message: String,
}

/// Failure envelope returned instead of a [`SearchResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl From<&SearchError> for ErrorResponse {
    fn from(err: &SearchError) -> Self {
        Self {
            error: ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn request_defaults_apply() {
        let request: SearchRequest = serde_json::from_str(r#"{"query": "rust"}"#).unwrap();
        assert_eq!(request.max_results, 10);
        assert!(request.sources.is_empty());
        assert_eq!(request.filters, SearchFilters::default());
    }

    #[test]
    fn request_parses_filters() {
        let request: SearchRequest = serde_json::from_str(
            r#"{
                "query": "protein folding",
                "max_results": 5,
                "sources": ["arxiv"],
                "filters": {
                    "date_range": {"start": "2020-01-01T00:00:00Z", "end": "2021-01-01T00:00:00Z"},
                    "min_relevance": 0.3
                }
            }"#,
        )
        .unwrap();
        assert_eq!(request.max_results, 5);
        assert!(request.filters.date_range.is_some());
        assert_eq!(request.filters.min_relevance, Some(0.3));
    }

    #[test]
    fn empty_sources_fall_back_to_defaults() {
        let defaults = vec!["duckduckgo".to_string(), "arxiv".to_string()];
        let query = SearchRequest::new("rust async").into_query(&defaults).unwrap();
        assert_eq!(query.sources().len(), 2);
    }

    #[test]
    fn short_query_is_rejected() {
        let err = SearchRequest::new("ab").into_query(&["arxiv".to_string()]).unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[test]
    fn response_uses_snake_case_status_labels() {
        let response = SearchResponse {
            results: vec![],
            total_results: 0,
            search_time: 0.25,
            backend_status: BTreeMap::from([
                ("arxiv".to_string(), BackendStatus::Ok),
                ("searx".to_string(), BackendStatus::TimedOut),
            ]),
            cached: false,
            request_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["backend_status"]["searx"], "timed_out");
        assert_eq!(json["backend_status"]["arxiv"], "ok");
    }

    #[test]
    fn error_envelope_shape() {
        let envelope = ErrorResponse::from(&SearchError::Validation("too short".into()));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["kind"], "validation");
        assert_eq!(json["error"]["message"], "invalid query: too short");
    }
}
