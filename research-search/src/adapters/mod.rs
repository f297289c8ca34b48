//! Concrete backend adapters and the lookup table that builds them.
//!
//! The adapter set is closed: [`build_adapter`] maps each [`BackendKind`] to
//! its implementation. Shared parsing helpers live here.

pub mod arxiv;
pub mod duckduckgo;
pub mod searx;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::adapter::SourceAdapter;
use crate::config::BackendConfig;
use crate::error::SearchError;
use crate::types::BackendKind;

pub use arxiv::ArxivAdapter;
pub use duckduckgo::DuckDuckGoAdapter;
pub use searx::SearXAdapter;

/// Build the adapter for one configured backend.
///
/// # Errors
///
/// Returns [`SearchError::Config`] if the backend's kind cannot be resolved.
pub fn build_adapter(
    config: &BackendConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn SourceAdapter>, SearchError> {
    let kind = config.resolved_kind().ok_or_else(|| {
        SearchError::Config(format!("{}: unknown backend kind", config.name))
    })?;
    let name = config.name.clone();
    let base_url = config.base_url.clone();
    let adapter: Arc<dyn SourceAdapter> = match kind {
        BackendKind::DuckDuckGo => Arc::new(DuckDuckGoAdapter::new(name, base_url, client)),
        BackendKind::SearX => Arc::new(SearXAdapter::new(name, base_url, client)),
        BackendKind::Arxiv => Arc::new(ArxivAdapter::new(name, base_url, client)),
    };
    tracing::debug!(backend = %config.name, %kind, "adapter built");
    Ok(adapter)
}

/// Relevance for the item at 0-based `position` of a backend's ranked list.
pub(crate) fn position_decay(position: usize) -> f64 {
    1.0 / (1.0 + 0.1 * position as f64)
}

/// Parse the date formats backends emit: RFC 3339, naive timestamps and
/// plain dates. Naive values are taken as UTC.
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Collapse runs of whitespace (including newlines in feed text) to one space.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn trim_base(base_url: Option<String>, default: &str) -> String {
    base_url
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
