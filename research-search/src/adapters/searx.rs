//! SearX / SearXNG adapter.
//!
//! Queries an instance's `/search` endpoint with `format=json`. The instance
//! reports a per-result `score`; relevance is that score relative to the best
//! one in the response, or position decay when no scores are present.

use async_trait::async_trait;
use serde::Deserialize;

use super::{collapse_whitespace, parse_date, position_decay, trim_base};
use crate::adapter::SourceAdapter;
use crate::error::SearchError;
use crate::http;
use crate::types::{SearchQuery, SourceResult};

const DEFAULT_BASE_URL: &str = "http://localhost:8888";

/// SearX JSON API adapter.
pub struct SearXAdapter {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl SearXAdapter {
    pub fn new(name: String, base_url: Option<String>, client: reqwest::Client) -> Self {
        Self {
            name,
            base_url: trim_base(base_url, DEFAULT_BASE_URL),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearXResponse {
    #[serde(default)]
    results: Vec<SearXItem>,
}

#[derive(Debug, Deserialize)]
struct SearXItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    score: Option<f64>,
    #[serde(rename = "publishedDate")]
    published_date: Option<String>,
    author: Option<String>,
}

#[async_trait]
impl SourceAdapter for SearXAdapter {
    async fn issue(&self, query: &SearchQuery) -> Result<Vec<SourceResult>, SearchError> {
        tracing::trace!(query = query.text(), "SearX search");

        let params = [
            ("q", query.text().to_string()),
            ("format", "json".to_string()),
            ("pageno", "1".to_string()),
            ("language", "en".to_string()),
            ("categories", "general".to_string()),
        ];
        let body = http::get_text(
            &self.client,
            &self.name,
            &format!("{}/search", self.base_url),
            &params,
        )
        .await?;

        parse_searx_json(&body, &self.name, query.max_results())
    }
}

/// Parse a SearX JSON body into search results.
pub(crate) fn parse_searx_json(
    body: &str,
    source: &str,
    max_results: usize,
) -> Result<Vec<SourceResult>, SearchError> {
    let response: SearXResponse = serde_json::from_str(body)
        .map_err(|e| SearchError::MalformedResponse(format!("{source}: {e}")))?;

    let items: Vec<SearXItem> = response
        .results
        .into_iter()
        .filter(|item| !item.title.trim().is_empty() && !item.url.trim().is_empty())
        .take(max_results)
        .collect();

    let max_score = items
        .iter()
        .filter_map(|item| item.score)
        .filter(|score| score.is_finite() && *score > 0.0)
        .fold(0.0_f64, f64::max);

    let results: Vec<SourceResult> = items
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            let raw_relevance = match item.score {
                Some(score) if max_score > 0.0 && score.is_finite() => {
                    (score / max_score).clamp(0.0, 1.0)
                }
                _ => position_decay(position),
            };
            SourceResult {
                title: collapse_whitespace(&item.title),
                url: item.url.trim().to_string(),
                snippet: collapse_whitespace(&item.content),
                source: source.to_string(),
                raw_relevance,
                published_date: item.published_date.as_deref().and_then(parse_date),
                author: item
                    .author
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty()),
            }
        })
        .collect();

    tracing::debug!(backend = source, count = results.len(), "SearX results parsed");
    Ok(results)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::types::SearchFilters;
    use chrono::Datelike;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MOCK_SEARX_JSON: &str = r#"{
        "query": "rust async",
        "results": [
            {"title": "Async Rust", "url": "https://rust-lang.github.io/async-book/", "content": "The async book.", "score": 4.0, "engine": "google"},
            {"title": "Tokio", "url": "https://tokio.rs/", "content": "An asynchronous runtime.", "score": 2.0, "publishedDate": "2023-06-01T00:00:00", "author": "Tokio Team"},
            {"title": "", "url": "https://empty.example/", "content": "dropped"},
            {"title": "async-std", "url": "https://async.rs/", "content": "Async version of std.", "score": 1.0}
        ],
        "suggestions": ["rust futures"]
    }"#;

    #[test]
    fn parse_normalizes_scores_against_best() {
        let results = parse_searx_json(MOCK_SEARX_JSON, "searx", 10).unwrap();
        assert_eq!(results.len(), 3);
        assert!((results[0].raw_relevance - 1.0).abs() < 1e-12);
        assert!((results[1].raw_relevance - 0.5).abs() < 1e-12);
        assert!((results[2].raw_relevance - 0.25).abs() < 1e-12);
    }

    #[test]
    fn parse_reads_date_and_author() {
        let results = parse_searx_json(MOCK_SEARX_JSON, "searx", 10).unwrap();
        let tokio = &results[1];
        assert_eq!(tokio.author.as_deref(), Some("Tokio Team"));
        assert_eq!(tokio.published_date.unwrap().year(), 2023);
        assert!(results[0].published_date.is_none());
    }

    #[test]
    fn parse_without_scores_uses_position_decay() {
        let body = r#"{"results": [
            {"title": "A", "url": "https://a.example/"},
            {"title": "B", "url": "https://b.example/"}
        ]}"#;
        let results = parse_searx_json(body, "searx", 10).unwrap();
        assert!((results[0].raw_relevance - 1.0).abs() < f64::EPSILON);
        assert!((results[1].raw_relevance - position_decay(1)).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_respects_max_results() {
        let results = parse_searx_json(MOCK_SEARX_JSON, "searx", 1).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].raw_relevance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn parse_invalid_body_is_malformed() {
        let err = parse_searx_json("not json", "searx", 10).unwrap_err();
        assert!(matches!(err, SearchError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn issue_hits_search_endpoint_with_json_format() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "rust async"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MOCK_SEARX_JSON))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = SearXAdapter::new(
            "searx-local".into(),
            Some(format!("{}/", server.uri())),
            http::build_client(None).unwrap(),
        );
        let query =
            SearchQuery::new("rust async", 10, ["searx-local"], SearchFilters::default()).unwrap();
        let results = adapter.issue(&query).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.source == "searx-local"));
    }
}
