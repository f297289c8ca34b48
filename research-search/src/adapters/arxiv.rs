//! arXiv adapter.
//!
//! Queries `http://export.arxiv.org/api/query` and reads the Atom feed it
//! returns. A query date range becomes a `submittedDate:[.. TO ..]` clause.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::{collapse_whitespace, parse_date, position_decay, trim_base};
use crate::adapter::SourceAdapter;
use crate::error::SearchError;
use crate::http;
use crate::types::{DateRange, SearchQuery, SourceResult};

const DEFAULT_BASE_URL: &str = "http://export.arxiv.org/api";

/// arXiv Atom API adapter.
pub struct ArxivAdapter {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl ArxivAdapter {
    pub fn new(name: String, base_url: Option<String>, client: reqwest::Client) -> Self {
        Self {
            name,
            base_url: trim_base(base_url, DEFAULT_BASE_URL),
            client,
        }
    }
}

/// Build the `search_query` parameter for `query`.
pub(crate) fn search_expression(text: &str, date_range: Option<&DateRange>) -> String {
    let mut expression = format!("all:{text}");
    if let Some(range) = date_range {
        expression.push_str(&format!(
            " AND submittedDate:[{} TO {}]",
            range.start.format("%Y%m%d%H%M"),
            range.end.format("%Y%m%d%H%M")
        ));
    }
    expression
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    async fn issue(&self, query: &SearchQuery) -> Result<Vec<SourceResult>, SearchError> {
        tracing::trace!(query = query.text(), "arXiv search");

        let params = [
            (
                "search_query",
                search_expression(query.text(), query.filters().date_range.as_ref()),
            ),
            ("start", "0".to_string()),
            ("max_results", query.max_results().to_string()),
            ("sortBy", "relevance".to_string()),
            ("sortOrder", "descending".to_string()),
        ];
        let body = http::get_text(
            &self.client,
            &self.name,
            &format!("{}/query", self.base_url),
            &params,
        )
        .await?;

        parse_atom_feed(&body, &self.name, query.max_results())
    }
}

fn selector(css: &str) -> Result<Selector, SearchError> {
    Selector::parse(css)
        .map_err(|e| SearchError::MalformedResponse(format!("invalid selector {css}: {e:?}")))
}

fn first_text(entry: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    entry
        .select(sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

/// Parse an arXiv Atom feed into search results.
///
/// Extracted as a separate function for testability with canned feeds.
pub(crate) fn parse_atom_feed(
    body: &str,
    source: &str,
    max_results: usize,
) -> Result<Vec<SourceResult>, SearchError> {
    if !body.contains("<feed") {
        return Err(SearchError::MalformedResponse(format!(
            "{source}: response is not an Atom feed"
        )));
    }

    let document = Html::parse_document(body);
    let entry_sel = selector("entry")?;
    let title_sel = selector("title")?;
    let summary_sel = selector("summary")?;
    let published_sel = selector("published")?;
    let id_sel = selector("id")?;
    let author_sel = selector("author name")?;
    let pdf_sel = selector(r#"link[title="pdf"]"#)?;
    let alternate_sel = selector(r#"link[rel="alternate"]"#)?;

    let mut results = Vec::new();
    for entry in document.select(&entry_sel) {
        let id = first_text(&entry, &id_sel);
        if id.as_deref().is_some_and(|id| id.contains("/api/errors")) {
            let detail = first_text(&entry, &summary_sel).unwrap_or_default();
            return Err(SearchError::MalformedResponse(format!(
                "{source}: API error: {detail}"
            )));
        }

        let Some(title) = first_text(&entry, &title_sel) else {
            continue;
        };
        let href = |sel: &Selector| {
            entry
                .select(sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(str::to_string)
        };
        let Some(url) = href(&pdf_sel).or_else(|| href(&alternate_sel)).or(id) else {
            continue;
        };

        results.push(SourceResult {
            title,
            url,
            snippet: first_text(&entry, &summary_sel).unwrap_or_default(),
            source: source.to_string(),
            raw_relevance: position_decay(results.len()),
            published_date: first_text(&entry, &published_sel)
                .as_deref()
                .and_then(parse_date),
            author: first_text(&entry, &author_sel),
        });
        if results.len() >= max_results {
            break;
        }
    }

    tracing::debug!(backend = source, count = results.len(), "arXiv entries parsed");
    Ok(results)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::types::SearchFilters;
    use chrono::{Datelike, TimeZone, Utc};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MOCK_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <link href="http://arxiv.org/api/query" rel="self" type="application/atom+xml"/>
  <title type="html">ArXiv Query: search_query=all:transformers</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <published>2017-06-12T17:57:34Z</published>
    <title>Attention Is All
      You Need</title>
    <summary>  The dominant sequence transduction models are based on
      complex recurrent networks.</summary>
    <author><name>Ashish Vaswani</name></author>
    <author><name>Noam Shazeer</name></author>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/1706.03762v7" rel="related" type="application/pdf"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/1810.04805v2</id>
    <published>2018-10-11T00:50:01Z</published>
    <title>BERT: Pre-training of Deep Bidirectional Transformers</title>
    <summary>We introduce a new language representation model.</summary>
    <author><name>Jacob Devlin</name></author>
    <link href="http://arxiv.org/abs/1810.04805v2" rel="alternate" type="text/html"/>
  </entry>
</feed>"#;

    #[test]
    fn parse_reads_entries() {
        let results = parse_atom_feed(MOCK_FEED, "arxiv", 10).unwrap();
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.title, "Attention Is All You Need");
        assert_eq!(first.url, "http://arxiv.org/pdf/1706.03762v7");
        assert!(first.snippet.starts_with("The dominant sequence"));
        assert_eq!(first.author.as_deref(), Some("Ashish Vaswani"));
        assert_eq!(first.published_date.unwrap().year(), 2017);
        assert_eq!(first.source, "arxiv");
    }

    #[test]
    fn parse_falls_back_to_abstract_link() {
        let results = parse_atom_feed(MOCK_FEED, "arxiv", 10).unwrap();
        assert_eq!(results[1].url, "http://arxiv.org/abs/1810.04805v2");
        assert!(results[1].raw_relevance < results[0].raw_relevance);
    }

    #[test]
    fn parse_respects_max_results() {
        let results = parse_atom_feed(MOCK_FEED, "arxiv", 1).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn parse_empty_feed_is_ok() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        assert!(parse_atom_feed(feed, "arxiv", 10).unwrap().is_empty());
    }

    #[test]
    fn parse_non_feed_is_malformed() {
        let err = parse_atom_feed("{\"json\": true}", "arxiv", 10).unwrap_err();
        assert!(matches!(err, SearchError::MalformedResponse(_)));
    }

    #[test]
    fn parse_api_error_entry_is_malformed() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom">
          <entry>
            <id>http://arxiv.org/api/errors#incorrect_id_format</id>
            <title>Error</title>
            <summary>incorrect id format</summary>
          </entry>
        </feed>"#;
        let err = parse_atom_feed(feed, "arxiv", 10).unwrap_err();
        assert!(err.to_string().contains("incorrect id format"));
    }

    #[test]
    fn search_expression_adds_date_clause() {
        let range = DateRange {
            start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2021, 6, 30, 23, 59, 0).unwrap(),
        };
        assert_eq!(search_expression("llm", None), "all:llm");
        assert_eq!(
            search_expression("llm", Some(&range)),
            "all:llm AND submittedDate:[202001010000 TO 202106302359]"
        );
    }

    #[tokio::test]
    async fn issue_queries_atom_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("search_query", "all:transformers"))
            .and(query_param("max_results", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MOCK_FEED))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = ArxivAdapter::new(
            "arxiv".into(),
            Some(format!("{}/api", server.uri())),
            http::build_client(None).unwrap(),
        );
        let query = SearchQuery::new("transformers", 5, ["arxiv"], SearchFilters::default())
            .unwrap();
        let results = adapter.issue(&query).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn live_arxiv_search() {
        let adapter = ArxivAdapter::new("arxiv".into(), None, http::build_client(None).unwrap());
        let query = SearchQuery::new("graph neural networks", 3, ["arxiv"], SearchFilters::default())
            .unwrap();
        let results = adapter.issue(&query).await.unwrap();
        assert!(!results.is_empty());
    }
}
