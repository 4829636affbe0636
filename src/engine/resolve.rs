//! Resolution selection over a ranked match set.
//!
//! The top-ranked match's resolution is always the authoritative best
//! solution for a query; callers decide how much of the ranked list to
//! surface beyond that.

use serde::{Deserialize, Serialize};

use crate::incidents::MatchSet;

/// Selector output: the best solution (if any) plus the full ranked set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub solution: Option<String>,
    pub matches: MatchSet,
}

/// Pick the authoritative solution from a ranked match set.
///
/// Empty set means no solution. Otherwise the top entry's resolution wins;
/// an empty or whitespace-only resolution (a reference-only record) yields
/// `None` while the matches are still returned.
pub fn select(matches: MatchSet) -> Resolution {
    Resolution {
        solution: best_solution(&matches),
        matches,
    }
}

/// The top match's resolution, or `None` when there is no usable one.
pub fn best_solution(matches: &MatchSet) -> Option<String> {
    matches
        .first()
        .map(|top| top.record.resolution.trim())
        .filter(|resolution| !resolution.is_empty())
        .map(str::to_string)
}
