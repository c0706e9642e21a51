//! Pre-filter vs. post-filter query planning.
//!
//! Pure, stateless functions: given an estimate of how selective a filter
//! is, decide whether to widen the beam and discard non-matches after an
//! unfiltered search (post-filter) or to enumerate matching ids directly
//! from the metadata store and skip the graph altogether (pre-filter). No
//! caching across calls.

use crate::filter::Predicate;
use crate::metadata::MetadataRecord;

/// Sample size used by [`estimate_selectivity`] when no histogram is available.
pub const SELECTIVITY_SAMPLE_SIZE: usize = 1024;

/// Below this estimated selectivity, planning switches to pre-filtering
/// (enumerate matches directly) rather than widening the graph search.
const PRE_FILTER_THRESHOLD: f64 = 0.01;

/// Chosen filtering strategy for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterPlan {
    /// Run an unfiltered graph search with `ef_search' = ef_search * oversample`,
    /// then discard results failing the filter.
    PostFilter {
        /// Multiplier applied to the caller's requested `ef_search`.
        oversample: f64,
    },
    /// Enumerate matching ids from the metadata store directly; bypass the graph.
    PreFilter,
}

/// Estimates the fraction of `records` matching `predicate` by sampling up
/// to [`SELECTIVITY_SAMPLE_SIZE`] of them (or all of them, if fewer exist).
///
/// Returns `1.0` (matches everything) for an empty sample, so callers never
/// divide by a zero selectivity downstream.
#[must_use]
pub fn estimate_selectivity<'a>(
    predicate: &Predicate,
    mut records: impl Iterator<Item = &'a MetadataRecord>,
) -> f64 {
    let mut sampled = 0usize;
    let mut matched = 0usize;
    while sampled < SELECTIVITY_SAMPLE_SIZE {
        let Some(record) = records.next() else {
            break;
        };
        sampled += 1;
        if predicate.matches(record) {
            matched += 1;
        }
    }
    if sampled == 0 {
        1.0
    } else {
        matched as f64 / sampled as f64
    }
}

/// Chooses pre-filter or post-filter given an estimated selectivity.
#[must_use]
pub fn plan(selectivity: f64) -> FilterPlan {
    if selectivity < PRE_FILTER_THRESHOLD {
        return FilterPlan::PreFilter;
    }
    let oversample = if selectivity >= 0.5 {
        2.0
    } else {
        (1.0 / selectivity).max(4.0)
    };
    FilterPlan::PostFilter { oversample }
}
