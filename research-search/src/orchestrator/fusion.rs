//! Result fusion: normalise, group near-duplicates, score and rank.
//!
//! [`fuse`] is a pure function of its input set. Candidates are put into a
//! canonical order before anything else happens, so the order in which
//! backends answered never changes the ranked output, not even through
//! floating-point summation order.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::dedup::{group_duplicates, title_tokens, DedupKey};
use super::scoring::{apply_date_boost, contribution, normalize, weighted_average};
use super::url_normalize::normalize_url;
use crate::config::MergeStrategy;
use crate::types::{FusedResult, SearchFilters, SourceResult};

/// Results returned by one successful backend, with its fusion weight.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendBatch {
    pub backend: String,
    pub weight: f64,
    pub results: Vec<SourceResult>,
}

#[derive(Debug)]
struct Candidate {
    result: SourceResult,
    backend: String,
    weight: f64,
    key: DedupKey,
}

impl Candidate {
    fn contribution(&self) -> f64 {
        contribution(self.result.raw_relevance, self.weight)
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.key
            .normalized_url
            .cmp(&other.key.normalized_url)
            .then_with(|| self.backend.cmp(&other.backend))
            .then_with(|| self.result.url.cmp(&other.result.url))
            .then_with(|| self.result.title.cmp(&other.result.title))
            .then_with(|| self.result.snippet.cmp(&other.result.snippet))
            .then_with(|| {
                self.result
                    .raw_relevance
                    .total_cmp(&other.result.raw_relevance)
            })
            .then_with(|| self.result.published_date.cmp(&other.result.published_date))
            .then_with(|| self.result.author.cmp(&other.result.author))
    }
}

struct Group {
    fused: FusedResult,
    top_weight: f64,
    sort_url: String,
}

/// Fuse per-backend batches into one ranked, deduplicated list.
///
/// The list is not truncated; `filters.min_relevance` drops groups scoring
/// below it before ranks are assigned.
pub fn fuse(
    batches: &[BackendBatch],
    filters: &SearchFilters,
    strategy: MergeStrategy,
) -> Vec<FusedResult> {
    let mut candidates: Vec<Candidate> = batches
        .iter()
        .flat_map(|batch| {
            let weight = match strategy {
                MergeStrategy::Weighted => batch.weight.max(0.0),
                MergeStrategy::Simple => 1.0,
            };
            batch.results.iter().map(move |result| Candidate {
                key: DedupKey {
                    normalized_url: normalize_url(&result.url),
                    title_tokens: title_tokens(&result.title),
                },
                result: result.clone(),
                backend: batch.backend.clone(),
                weight,
            })
        })
        .collect();
    candidates.sort_by(Candidate::canonical_cmp);

    let max_weight = candidates.iter().map(|c| c.weight).fold(0.0_f64, f64::max);
    let keys: Vec<DedupKey> = candidates.iter().map(|c| c.key.clone()).collect();

    let mut groups: Vec<Group> = group_duplicates(&keys)
        .into_iter()
        .map(|members| build_group(&candidates, &members, max_weight, filters))
        .filter(|group| {
            filters
                .min_relevance
                .is_none_or(|min| group.fused.normalized_score >= min)
        })
        .collect();

    groups.sort_by(|a, b| {
        b.fused
            .normalized_score
            .total_cmp(&a.fused.normalized_score)
            .then_with(|| b.top_weight.total_cmp(&a.top_weight))
            .then_with(|| a.sort_url.cmp(&b.sort_url))
    });

    let fused: Vec<FusedResult> = groups
        .into_iter()
        .enumerate()
        .map(|(i, group)| FusedResult {
            rank: i + 1,
            ..group.fused
        })
        .collect();

    tracing::debug!(
        candidates = candidates.len(),
        fused = fused.len(),
        "fusion complete"
    );
    fused
}

fn build_group(
    candidates: &[Candidate],
    members: &[usize],
    max_weight: f64,
    filters: &SearchFilters,
) -> Group {
    let members: Vec<&Candidate> = members.iter().map(|&i| &candidates[i]).collect();

    // Members arrive in canonical order; strict comparison keeps the first
    // of equals.
    let mut representative = members[0];
    for &member in &members[1..] {
        let better = member
            .contribution()
            .total_cmp(&representative.contribution())
            .then_with(|| member.weight.total_cmp(&representative.weight))
            == Ordering::Greater;
        if better {
            representative = member;
        }
    }

    let contributions: Vec<(f64, f64)> =
        members.iter().map(|m| (m.contribution(), m.weight)).collect();
    let published_date: Option<DateTime<Utc>> =
        members.iter().filter_map(|m| m.result.published_date).min();
    let score = apply_date_boost(
        normalize(weighted_average(&contributions), max_weight),
        published_date,
        filters.date_range.as_ref(),
    );

    let authors: BTreeSet<String> = members
        .iter()
        .filter_map(|m| m.result.author.clone())
        .collect();
    let merged_from: BTreeSet<String> = members.iter().map(|m| m.backend.clone()).collect();
    let top_weight = members.iter().map(|m| m.weight).fold(0.0_f64, f64::max);

    let snippet = if representative.result.snippet.is_empty() {
        members
            .iter()
            .map(|m| m.result.snippet.as_str())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    } else {
        representative.result.snippet.clone()
    };

    Group {
        fused: FusedResult {
            title: representative.result.title.clone(),
            url: representative.result.url.clone(),
            snippet,
            source: representative.backend.clone(),
            raw_relevance: representative.result.raw_relevance,
            published_date,
            authors: authors.into_iter().collect(),
            normalized_score: score,
            rank: 0,
            merged_from,
        },
        top_weight,
        sort_url: representative.key.normalized_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::types::DateRange;
    use chrono::TimeZone;

    fn item(backend: &str, url: &str, title: &str, raw: f64) -> SourceResult {
        SourceResult {
            title: title.to_string(),
            url: url.to_string(),
            snippet: format!("snippet for {title}"),
            source: backend.to_string(),
            raw_relevance: raw,
            published_date: None,
            author: None,
        }
    }

    fn batch(backend: &str, weight: f64, results: Vec<SourceResult>) -> BackendBatch {
        BackendBatch {
            backend: backend.to_string(),
            weight,
            results,
        }
    }

    fn weighted(batches: &[BackendBatch]) -> Vec<FusedResult> {
        fuse(batches, &SearchFilters::default(), MergeStrategy::Weighted)
    }

    #[test]
    fn heavier_backend_ranks_first_at_equal_relevance() {
        let batches = vec![
            batch("a", 1.0, vec![item("a", "https://a.example/1", "alpha result", 0.8)]),
            batch("b", 2.0, vec![item("b", "https://b.example/1", "beta result", 0.8)]),
        ];
        let fused = weighted(&batches);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].source, "b");
        assert!(fused[0].normalized_score > fused[1].normalized_score);
        assert!((fused[0].normalized_score - 0.8).abs() < 1e-9);
        assert!((fused[1].normalized_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn same_normalized_url_merges_across_backends() {
        let batches = vec![
            batch(
                "duckduckgo",
                1.0,
                vec![item("duckduckgo", "https://Example.com/paper/?utm_source=ddg", "Paper", 0.9)],
            ),
            batch(
                "searx",
                1.0,
                vec![item("searx", "https://example.com/paper#abstract", "The paper", 0.7)],
            ),
        ];
        let fused = weighted(&batches);
        assert_eq!(fused.len(), 1);
        let merged: Vec<&str> = fused[0].merged_from.iter().map(String::as_str).collect();
        assert_eq!(merged, vec!["duckduckgo", "searx"]);
        assert_eq!(fused[0].source, "duckduckgo", "highest contribution represents");
    }

    #[test]
    fn similar_titles_merge_and_union_metadata() {
        let mut first = item("arxiv", "https://arxiv.org/abs/1", "Attention Is All You Need", 1.0);
        first.author = Some("Vaswani".into());
        first.published_date = Some(Utc.with_ymd_and_hms(2017, 6, 12, 0, 0, 0).unwrap());
        let mut second = item("searx", "https://papers.example/aiayn", "attention is all you need", 0.5);
        second.author = Some("Shazeer".into());
        second.published_date = Some(Utc.with_ymd_and_hms(2017, 12, 6, 0, 0, 0).unwrap());

        let fused = weighted(&[batch("arxiv", 1.0, vec![first]), batch("searx", 1.0, vec![second])]);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].authors, vec!["Shazeer", "Vaswani"]);
        assert_eq!(
            fused[0].published_date,
            Some(Utc.with_ymd_and_hms(2017, 6, 12, 0, 0, 0).unwrap())
        );
        assert_eq!(fused[0].url, "https://arxiv.org/abs/1");
    }

    #[test]
    fn output_is_independent_of_batch_order() {
        let a = batch(
            "a",
            1.0,
            vec![
                item("a", "https://x.example/1", "first topic", 0.7),
                item("a", "https://x.example/2", "second topic", 0.7),
            ],
        );
        let b = batch(
            "b",
            1.0,
            vec![
                item("b", "https://y.example/1", "third topic", 0.7),
                item("b", "https://x.example/2", "second topic again", 0.4),
            ],
        );
        let forward = weighted(&[a.clone(), b.clone()]);
        let backward = weighted(&[b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn ties_break_on_weight_then_url() {
        let batches = vec![
            batch("a", 1.0, vec![item("a", "https://b.example/", "gamma", 0.5)]),
            batch("b", 1.0, vec![item("b", "https://a.example/", "delta", 0.5)]),
        ];
        let fused = weighted(&batches);
        assert_eq!(fused[0].url, "https://a.example/");
        assert_eq!(fused[1].url, "https://b.example/");
    }

    #[test]
    fn ranks_are_dense_and_scores_non_increasing() {
        let results: Vec<SourceResult> = (0..6)
            .map(|i| {
                item(
                    "a",
                    &format!("https://x.example/{i}"),
                    &format!("distinct title number {i} {}", "z".repeat(i)),
                    1.0 / (1.0 + i as f64),
                )
            })
            .collect();
        let fused = weighted(&[batch("a", 1.0, results)]);
        for (i, result) in fused.iter().enumerate() {
            assert_eq!(result.rank, i + 1);
        }
        for pair in fused.windows(2) {
            assert!(pair[0].normalized_score >= pair[1].normalized_score);
        }
    }

    #[test]
    fn urls_are_unique_after_fusion() {
        let batches = vec![
            batch("a", 1.0, vec![item("a", "https://x.example/p", "one", 0.9)]),
            batch("b", 1.0, vec![item("b", "https://x.example/p/", "two", 0.9)]),
            batch("c", 1.0, vec![item("c", "https://x.example/q", "three", 0.9)]),
        ];
        let fused = weighted(&batches);
        let urls: BTreeSet<&str> = fused.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls.len(), fused.len());
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn simple_strategy_ignores_weights() {
        let batches = vec![
            batch("a", 1.0, vec![item("a", "https://a.example/1", "alpha result", 0.9)]),
            batch("b", 5.0, vec![item("b", "https://b.example/1", "beta result", 0.8)]),
        ];
        let fused = fuse(&batches, &SearchFilters::default(), MergeStrategy::Simple);
        assert_eq!(fused[0].source, "a");
        assert!((fused[0].normalized_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn min_relevance_filters_before_ranking() {
        let batches = vec![batch(
            "a",
            1.0,
            vec![
                item("a", "https://a.example/1", "strong match", 0.9),
                item("a", "https://a.example/2", "weak match here", 0.2),
            ],
        )];
        let filters = SearchFilters {
            min_relevance: Some(0.5),
            ..Default::default()
        };
        let fused = fuse(&batches, &filters, MergeStrategy::Weighted);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].rank, 1);
    }

    #[test]
    fn date_range_boosts_recent_results() {
        let mut recent = item("a", "https://a.example/new", "new work", 0.5);
        recent.published_date = Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        let old = item("a", "https://a.example/old", "old work", 0.5);
        let filters = SearchFilters {
            date_range: Some(DateRange {
                start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
            }),
            ..Default::default()
        };
        let fused = fuse(&[batch("a", 1.0, vec![old, recent])], &filters, MergeStrategy::Weighted);
        assert_eq!(fused[0].url, "https://a.example/new");
        assert!((fused[0].normalized_score - 0.55).abs() < 1e-9);
    }

    #[test]
    fn zero_weight_backend_scores_zero() {
        let fused = weighted(&[batch("a", 0.0, vec![item("a", "https://a.example/", "t", 0.9)])]);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].normalized_score, 0.0);
    }

    #[test]
    fn empty_input_fuses_to_empty() {
        assert!(weighted(&[]).is_empty());
    }
}
