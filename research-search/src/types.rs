//! Core types: queries, per-backend results, fused results and backend status.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SearchError;

/// Shortest accepted query text, in characters after trimming.
pub const MIN_QUERY_CHARS: usize = 3;

/// Longest accepted query text, in characters after trimming.
pub const MAX_QUERY_CHARS: usize = 500;

/// Largest accepted `max_results`.
pub const MAX_RESULTS: usize = 100;

/// Backend implementations this crate knows how to talk to.
///
/// The set is closed: configuration picks among these variants by name, and
/// [`crate::adapters::build_adapter`] maps each variant to its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// DuckDuckGo Instant Answer JSON API.
    DuckDuckGo,
    /// A SearX / SearXNG instance's JSON API.
    SearX,
    /// arXiv Atom query API.
    Arxiv,
}

impl BackendKind {
    /// Configuration name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DuckDuckGo => "duckduckgo",
            Self::SearX => "searx",
            Self::Arxiv => "arxiv",
        }
    }

    /// Resolve a kind from its configuration name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Returns all available backend kinds.
    pub fn all() -> &'static [BackendKind] {
        &[Self::DuckDuckGo, Self::SearX, Self::Arxiv]
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive publication-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Returns `true` if `at` lies within the window (both ends inclusive).
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Optional query filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Results published inside this window receive a small ranking boost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    /// Fused results scoring below this are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_relevance: Option<f64>,
}

impl SearchFilters {
    fn validate(&self) -> Result<(), SearchError> {
        if let Some(range) = &self.date_range {
            if range.start > range.end {
                return Err(SearchError::Validation(
                    "date_range start must not be after end".into(),
                ));
            }
        }
        if let Some(min) = self.min_relevance {
            if !(0.0..=1.0).contains(&min) {
                return Err(SearchError::Validation(
                    "min_relevance must be within [0, 1]".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A validated search query.
///
/// Construction through [`SearchQuery::new`] is the only way to obtain one,
/// so every value in flight has already passed validation. There are no
/// setters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    text: String,
    max_results: usize,
    sources: BTreeSet<String>,
    filters: SearchFilters,
    request_id: Uuid,
}

impl SearchQuery {
    /// Validate inputs and build a query with a fresh request id.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Validation`] if the trimmed text is outside
    /// `3..=500` characters, `max_results` is outside `1..=100`, `sources` is empty, or
    /// the filters are inconsistent.
    pub fn new<I, S>(
        text: &str,
        max_results: usize,
        sources: I,
        filters: SearchFilters,
    ) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = text.trim();
        let chars = text.chars().count();
        if chars < MIN_QUERY_CHARS {
            return Err(SearchError::Validation(format!(
                "query must be at least {MIN_QUERY_CHARS} characters (got {chars})"
            )));
        }
        if chars > MAX_QUERY_CHARS {
            return Err(SearchError::Validation(format!(
                "query must be at most {MAX_QUERY_CHARS} characters (got {chars})"
            )));
        }
        if max_results == 0 {
            return Err(SearchError::Validation(
                "max_results must be greater than 0".into(),
            ));
        }
        if max_results > MAX_RESULTS {
            return Err(SearchError::Validation(format!(
                "max_results must be at most {MAX_RESULTS} (got {max_results})"
            )));
        }
        let sources: BTreeSet<String> = sources
            .into_iter()
            .map(|source| {
                let source: String = source.into();
                source.trim().to_string()
            })
            .filter(|s| !s.is_empty())
            .collect();
        if sources.is_empty() {
            return Err(SearchError::Validation(
                "at least one source must be selected".into(),
            ));
        }
        filters.validate()?;

        Ok(Self {
            text: text.to_string(),
            max_results,
            sources,
            filters,
            request_id: Uuid::new_v4(),
        })
    }

    /// Trimmed query text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Selected backend names, sorted.
    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    pub fn filters(&self) -> &SearchFilters {
        &self.filters
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

/// Registry entry describing one configured backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    /// Unique backend name, as used in `sources` and `backend_status`.
    pub name: String,
    /// Relative trust multiplier applied during fusion. Never negative.
    pub weight: f64,
    /// Per-attempt deadline.
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub enabled: bool,
}

/// A single item produced by one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Name of the backend that produced this item.
    pub source: String,
    /// Backend-local relevance in `[0, 1]`.
    pub raw_relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// One entry of the fused, ranked answer set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub title: String,
    /// Unique within one fused list; the only handle passed downstream.
    pub url: String,
    pub snippet: String,
    /// Backend whose item represents the group.
    pub source: String,
    /// Raw relevance of the representative item.
    pub raw_relevance: f64,
    /// Earliest publication date across the group.
    pub published_date: Option<DateTime<Utc>>,
    /// Union of authors across the group, sorted.
    pub authors: Vec<String>,
    /// Fused score in `[0, 1]`, non-increasing with rank.
    pub normalized_score: f64,
    /// 1-based, dense.
    pub rank: usize,
    /// Every backend that contributed an item to this group.
    pub merged_from: BTreeSet<String>,
}

/// Outcome of one backend within an aggregated search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Ok,
    TimedOut,
    Unavailable,
    Error,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::TimedOut => "timed_out",
            Self::Unavailable => "unavailable",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SearchError> for BackendStatus {
    fn from(err: &SearchError) -> Self {
        match err {
            SearchError::Timeout(_) => Self::TimedOut,
            SearchError::BackendUnavailable(_) | SearchError::RateLimited(_) => Self::Unavailable,
            _ => Self::Error,
        }
    }
}

/// Fused results plus the outcome of every dispatched backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub fused_results: Vec<FusedResult>,
    pub backend_status: BTreeMap<String, BackendStatus>,
}

impl AggregateResult {
    /// At least one backend failed while others succeeded.
    ///
    /// This is an annotation on a successful search, never an error.
    pub fn is_partial(&self) -> bool {
        self.backend_status
            .values()
            .any(|status| *status != BackendStatus::Ok)
    }

    /// Cut the ranked list to at most `max_results` entries.
    pub fn truncated(mut self, max_results: usize) -> Self {
        self.fused_results.truncate(max_results);
        self
    }
}
