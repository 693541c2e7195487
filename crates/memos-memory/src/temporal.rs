//! Temporal retrieval policy.
//!
//! Relative dates in a query ("last year") are resolved against the year of
//! the most recent timeline event, not the wall clock, so a simulated or
//! back-filled timeline stays internally consistent.  Timeline hits whose
//! year matches the resolved target are accepted with a looser distance
//! cutoff and ranked ahead of everything else.
//!
//! | hit kind              | accepted when distance < |
//! |-----------------------|--------------------------|
//! | timeline, year match  | [`MATCHED_YEAR_THRESHOLD`]   |
//! | timeline, other       | [`UNMATCHED_YEAR_THRESHOLD`] |
//! | entity                | [`ENTITY_DISTANCE_THRESHOLD`] |

use std::sync::LazyLock;

use regex::Regex;

use crate::document::{TimelineEvent, year_of};
use crate::vector::VectorHit;

pub const MATCHED_YEAR_THRESHOLD: f32 = 1.4;
pub const UNMATCHED_YEAR_THRESHOLD: f32 = 1.1;
pub const ENTITY_DISTANCE_THRESHOLD: f32 = 1.2;

static EXPLICIT_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(20\d{2})\b").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Year of the latest event, or `fallback_year` when the timeline is empty
/// or its last date does not parse.
pub fn resolve_current_year(events: &[TimelineEvent], fallback_year: i32) -> i32 {
    events.last().and_then(TimelineEvent::year).unwrap_or(fallback_year)
}

/// The year a query refers to, if any.
///
/// An explicit `20xx` token wins over "last year", which wins over
/// "this year".
pub fn detect_target_year(query: &str, current_year: i32) -> Option<i32> {
    if let Some(year) = EXPLICIT_YEAR
        .captures(query)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(year);
    }
    let lowered = query.to_lowercase();
    if lowered.contains("last year") {
        Some(current_year - 1)
    } else if lowered.contains("this year") {
        Some(current_year)
    } else {
        None
    }
}

fn hit_year(hit: &VectorHit) -> Option<i32> {
    hit.meta_str("date").and_then(year_of)
}

/// Filter and reorder timeline hits.
///
/// `hits` must already be in ascending-distance order.  Year-matched hits
/// that pass the looser cutoff come first, followed by the remaining hits
/// that pass the tighter one; both groups keep their similarity order.
pub fn rank_timeline_hits(hits: Vec<VectorHit>, target_year: Option<i32>) -> Vec<VectorHit> {
    let (matched, unmatched): (Vec<_>, Vec<_>) = hits
        .into_iter()
        .partition(|hit| target_year.is_some() && hit_year(hit) == target_year);

    matched
        .into_iter()
        .filter(|h| h.distance < MATCHED_YEAR_THRESHOLD)
        .chain(unmatched.into_iter().filter(|h| h.distance < UNMATCHED_YEAR_THRESHOLD))
        .collect()
}

/// Drop entity hits at or beyond [`ENTITY_DISTANCE_THRESHOLD`].
pub fn filter_entity_hits(hits: Vec<VectorHit>) -> Vec<VectorHit> {
    hits.into_iter()
        .filter(|h| h.distance < ENTITY_DISTANCE_THRESHOLD)
        .collect()
}
