//! Stability scoring and candidate ranking
//!
//! Scores are never stored. They are recomputed from a candidate's counters
//! and structural class every time they are read:
//!
//! ```text
//! score = success_count / max(effective_attempts, 1) * structural_weight
//! ```

use std::cmp::Ordering;

use crate::types::{SelectorCandidate, SelectorRecord};

/// Stability score in `[0, 1]`
pub fn score(candidate: &SelectorCandidate) -> f64 {
    let attempts = candidate.effective_attempts().max(1.0);
    let success_rate = (candidate.success_count as f64 / attempts).clamp(0.0, 1.0);
    success_rate * candidate.structural_class.weight()
}

/// Total preference order: score, then structural weight, then most-tested first
pub fn compare(a: &SelectorCandidate, b: &SelectorCandidate) -> Ordering {
    score(b)
        .total_cmp(&score(a))
        .then_with(|| {
            b.structural_class
                .weight()
                .total_cmp(&a.structural_class.weight())
        })
        .then_with(|| b.attempt_count.cmp(&a.attempt_count))
}

/// Indices into `record.candidates` in advisory try-order
///
/// The sort is stable, so candidates that tie on every key keep their stored order.
pub fn ranked_indices(record: &SelectorRecord) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..record.candidates.len()).collect();
    indices.sort_by(|&a, &b| compare(&record.candidates[a], &record.candidates[b]));
    indices
}

/// Candidates sorted by [`compare`], most preferred first
pub fn rank(record: &SelectorRecord) -> Vec<SelectorCandidate> {
    rank_candidates(&record.candidates)
}

pub fn rank_candidates(candidates: &[SelectorCandidate]) -> Vec<SelectorCandidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(compare);
    ranked
}

/// New stored order if the ranked leader beats the incumbent by more than `hysteresis`
///
/// Returns `None` when the stored order should be kept, which is the case for
/// small score swings caused by a single noisy failure.
pub fn reorder_for(record: &SelectorRecord, hysteresis: f64) -> Option<Vec<usize>> {
    let incumbent = record.candidates.first()?;
    let order = ranked_indices(record);
    let leader = *order.first()?;
    if leader == 0 {
        return None;
    }
    let margin = score(&record.candidates[leader]) - score(incumbent);
    if margin > hysteresis { Some(order) } else { None }
}

#[cfg(test)]
#[path = "scorer_test.rs"]
mod scorer_test;
