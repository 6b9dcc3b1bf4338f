//! Deterministic heuristic compatibility scoring.
//!
//! The score is additive over four rules and clamped to `0..=100`:
//!
//! | rule                                   | points          |
//! |----------------------------------------|-----------------|
//! | interest tag shared with candidate area | +20 per tag     |
//! | method tag shared with candidate        | +15 per tag     |
//! | degree level preferred by candidate     | +25             |
//! | availability of at least 10 hours/week  | +20             |
//!
//! Highlights name each satisfied comparison in the fixed order: shared
//! interests, shared methods, degree-level match. Availability contributes
//! points but no highlight.

use serde::{Deserialize, Serialize};

use crate::profile::{Candidate, Subject};

pub const POINTS_PER_SHARED_INTEREST: i64 = 20;
pub const POINTS_PER_SHARED_METHOD: i64 = 15;
pub const DEGREE_MATCH_POINTS: i64 = 25;
pub const AVAILABILITY_POINTS: i64 = 20;
/// Minimum weekly hours that earn the availability points.
pub const MIN_HOURS_PER_WEEK: i32 = 10;

pub const MAX_SCORE: u8 = 100;

/// Outcome of the heuristic scorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicScore {
    pub score: u8,
    pub highlights: Vec<String>,
}

/// Scores a subject against a candidate.
pub fn heuristic_score(subject: &Subject, candidate: &Candidate) -> HeuristicScore {
    let shared_interests = shared_tags(&subject.interests, &candidate.areas);
    let shared_methods = shared_tags(&subject.methods, &candidate.methods);
    let degree_match = !subject.degree_level.is_empty()
        && candidate
            .preferred_degree_levels
            .iter()
            .any(|level| *level == subject.degree_level);
    let available = subject
        .hours_per_week
        .is_some_and(|hours| hours >= MIN_HOURS_PER_WEEK);

    let mut total: i64 = 0;
    let mut highlights = Vec::new();

    if !shared_interests.is_empty() {
        total += POINTS_PER_SHARED_INTEREST * shared_interests.len() as i64;
        highlights.push(format!("shared interests: {}", shared_interests.join(", ")));
    }
    if !shared_methods.is_empty() {
        total += POINTS_PER_SHARED_METHOD * shared_methods.len() as i64;
        highlights.push(format!("shared methods: {}", shared_methods.join(", ")));
    }
    if degree_match {
        total += DEGREE_MATCH_POINTS;
        highlights.push(format!("degree-level match: {}", subject.degree_level));
    }
    if available {
        total += AVAILABILITY_POINTS;
    }

    HeuristicScore {
        score: clamp_score(total),
        highlights,
    }
}

/// Text used when no AI explanation is available.
pub fn fallback_explanation(score: u8) -> String {
    format!("match score {}/100 based on area and method overlap", score)
}

fn clamp_score(total: i64) -> u8 {
    // Lossless after the clamp.
    total.clamp(0, i64::from(MAX_SCORE)) as u8
}

/// Tags of `ours` also present in `theirs`, in `ours` order, without repeats.
fn shared_tags<'a>(ours: &'a [String], theirs: &[String]) -> Vec<&'a str> {
    let mut shared: Vec<&str> = Vec::new();
    for tag in ours {
        if theirs.contains(tag) && !shared.contains(&tag.as_str()) {
            shared.push(tag);
        }
    }
    shared
}
