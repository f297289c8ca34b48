//! Weighted scoring for fused result groups.
//!
//! Each contributing result scores `raw_relevance * backend_weight`. A
//! group's score is the weighted average of its contributions (weights are
//! the contributing backends' weights), divided by the largest weight among
//! all contributors so it lands in `[0, 1]`:
//!
//! ```text
//! contribution_i = raw_i * w_i
//! group          = sum(w_i * contribution_i) / sum(w_i)
//! normalized     = group / max_weight
//! ```
//!
//! With a single contributor this reduces to `raw * w / max_weight`, so a
//! heavier backend outranks a lighter one at equal raw relevance.

use chrono::{DateTime, Utc};

use crate::types::DateRange;

/// Score added when a group's publication date falls inside the query's
/// date range.
pub const DATE_BOOST: f64 = 0.05;

/// Score of one contributing result.
pub fn contribution(raw_relevance: f64, weight: f64) -> f64 {
    raw_relevance.clamp(0.0, 1.0) * weight
}

/// Weighted average of `(contribution, weight)` pairs.
///
/// Returns 0.0 when the weights sum to zero.
pub fn weighted_average(contributions: &[(f64, f64)]) -> f64 {
    let total_weight: f64 = contributions.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    contributions.iter().map(|(c, w)| c * w).sum::<f64>() / total_weight
}

/// Map a group score into `[0, 1]` relative to the heaviest contributor.
pub fn normalize(score: f64, max_weight: f64) -> f64 {
    if max_weight <= 0.0 || !score.is_finite() {
        return 0.0;
    }
    (score / max_weight).clamp(0.0, 1.0)
}

/// Add [`DATE_BOOST`] (capped at 1.0) when `published` lies in `range`.
pub fn apply_date_boost(
    score: f64,
    published: Option<DateTime<Utc>>,
    range: Option<&DateRange>,
) -> f64 {
    match (published, range) {
        (Some(date), Some(range)) if range.contains(date) => (score + DATE_BOOST).min(1.0),
        _ => score,
    }
}
