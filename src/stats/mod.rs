//! Statistical utilities shared across the extraction pipeline.
//!
//! The comparative-genomics components all reduce to set arithmetic over
//! presence/absence sets: Jaccard similarity between phenotype-outcome
//! vectors, Jaccard distance between cluster-presence vectors, and the
//! average-linkage clustering built on top of those distances (see
//! [`linkage`]).

pub mod linkage;

pub use linkage::{leaf_order, upgma, LinkageRow};

use std::collections::HashSet;
use std::hash::Hash;

/// Jaccard similarity between two sets: |A ∩ B| / |A ∪ B|.
///
/// Returns 0.0 when both sets are empty; an empty pair carries no signal
/// and must never win a nearest-neighbor search against a real overlap.
pub fn jaccard_similarity<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Jaccard distance between two sets: 1 − similarity.
///
/// Two empty sets are at distance 0 (they are indistinguishable), which
/// keeps distance(x, x) == 0 for every input.
pub fn jaccard_distance<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    1.0 - intersection as f64 / union as f64
}

/// Rounds to 4 decimal places, the fixed precision of every derived
/// score in the output documents.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Mean of the non-sentinel values in `values`, rounded to 4 decimals.
///
/// Returns the -1.0 sentinel when no value is computable.
pub fn sentinel_mean(values: &[f64]) -> f64 {
    let usable: Vec<f64> = values.iter().copied().filter(|v| *v >= 0.0).collect();
    if usable.is_empty() {
        return -1.0;
    }
    round4(usable.iter().sum::<f64>() / usable.len() as f64)
}
