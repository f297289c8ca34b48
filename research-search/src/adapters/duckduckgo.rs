//! DuckDuckGo Instant Answer adapter.
//!
//! Queries the JSON endpoint at `https://api.duckduckgo.com/` and reads the
//! `Results` list followed by `RelatedTopics` (nested topic groups are
//! flattened). Items have no score, so relevance decays with position.

use async_trait::async_trait;
use serde::Deserialize;

use super::{collapse_whitespace, position_decay, trim_base};
use crate::adapter::SourceAdapter;
use crate::error::SearchError;
use crate::http;
use crate::types::{SearchQuery, SourceResult};

const DEFAULT_BASE_URL: &str = "https://api.duckduckgo.com";

/// DuckDuckGo Instant Answer API adapter.
pub struct DuckDuckGoAdapter {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl DuckDuckGoAdapter {
    pub fn new(name: String, base_url: Option<String>, client: reqwest::Client) -> Self {
        Self {
            name,
            base_url: trim_base(base_url, DEFAULT_BASE_URL),
            client,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Results", default)]
    results: Vec<Topic>,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<Topic>,
}

#[derive(Debug, Deserialize)]
struct Topic {
    #[serde(rename = "Text")]
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
    /// Present on topic groups instead of `Text`/`FirstURL`.
    #[serde(rename = "Topics", default)]
    topics: Vec<Topic>,
}

fn flatten<'a>(topics: &'a [Topic], out: &mut Vec<&'a Topic>) {
    for topic in topics {
        if topic.topics.is_empty() {
            out.push(topic);
        } else {
            flatten(&topic.topics, out);
        }
    }
}

#[async_trait]
impl SourceAdapter for DuckDuckGoAdapter {
    async fn issue(&self, query: &SearchQuery) -> Result<Vec<SourceResult>, SearchError> {
        tracing::trace!(query = query.text(), "DuckDuckGo search");

        let params = [
            ("q", query.text().to_string()),
            ("format", "json".to_string()),
            ("no_html", "1".to_string()),
            ("no_redirect", "1".to_string()),
            ("skip_disambig", "1".to_string()),
        ];
        let body = http::get_text(
            &self.client,
            &self.name,
            &format!("{}/", self.base_url),
            &params,
        )
        .await?;

        parse_instant_answer(&body, &self.name, query.max_results())
    }
}

/// Parse an Instant Answer JSON body into search results.
///
/// Extracted as a separate function for testability with canned JSON.
pub(crate) fn parse_instant_answer(
    body: &str,
    source: &str,
    max_results: usize,
) -> Result<Vec<SourceResult>, SearchError> {
    let answer: InstantAnswer = serde_json::from_str(body)
        .map_err(|e| SearchError::MalformedResponse(format!("{source}: {e}")))?;

    let mut topics = Vec::new();
    flatten(&answer.results, &mut topics);
    flatten(&answer.related_topics, &mut topics);

    let mut results = Vec::new();
    for topic in topics {
        let (Some(text), Some(url)) = (topic.text.as_deref(), topic.first_url.as_deref()) else {
            continue;
        };
        let text = collapse_whitespace(text);
        if text.is_empty() || url.trim().is_empty() {
            continue;
        }
        results.push(SourceResult {
            title: text.clone(),
            url: url.trim().to_string(),
            snippet: text,
            source: source.to_string(),
            raw_relevance: position_decay(results.len()),
            published_date: None,
            author: None,
        });
        if results.len() >= max_results {
            break;
        }
    }

    tracing::debug!(backend = source, count = results.len(), "DuckDuckGo results parsed");
    Ok(results)
}
