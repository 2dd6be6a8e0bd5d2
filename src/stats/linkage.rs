//! Average-linkage (UPGMA) hierarchical clustering.
//!
//! Operates on a symmetric pairwise distance matrix and produces a linkage
//! table in the conventional form: each merge step records the two cluster
//! indices joined, the merge distance, and the size of the resulting
//! cluster. Leaves are numbered `0..n`; the cluster created at step `k`
//! gets index `n + k`, so the table can be replayed into a dendrogram by
//! any standard viewer.

use ndarray::Array2;
use serde::Serialize;
use std::collections::HashMap;

/// One merge step of the linkage table.
#[derive(Debug, Clone, Serialize)]
pub struct LinkageRow {
    /// Index of the first merged cluster (leaf or prior merge).
    pub left: usize,
    /// Index of the second merged cluster.
    pub right: usize,
    /// Average-linkage distance at which the merge happened.
    pub distance: f64,
    /// Number of leaves in the merged cluster.
    pub size: usize,
}

/// Runs UPGMA over a symmetric `n x n` distance matrix.
///
/// Returns `n - 1` merge rows; an empty vector for fewer than 2 leaves.
/// Ties on the minimum distance resolve to the smallest (left, right)
/// index pair, so the output is reproducible for a given matrix.
pub fn upgma(distances: &Array2<f64>) -> Vec<LinkageRow> {
    let n = distances.nrows();
    if n < 2 {
        return Vec::new();
    }

    // Active cluster id -> leaf count. Leaves start as singletons.
    let mut sizes: HashMap<usize, usize> = (0..n).map(|i| (i, 1)).collect();
    // Pairwise distances between active clusters, keyed by (min, max).
    let mut dist: HashMap<(usize, usize), f64> = HashMap::new();
    for i in 0..n {
        for j in (i + 1)..n {
            dist.insert((i, j), distances[[i, j]]);
        }
    }

    let mut active: Vec<usize> = (0..n).collect();
    let mut linkage = Vec::with_capacity(n - 1);

    for step in 0..(n - 1) {
        // Find the closest active pair; scan in index order so that ties
        // resolve to the smallest (i, j).
        let mut best: Option<(usize, usize, f64)> = None;
        for (a_pos, &a) in active.iter().enumerate() {
            for &b in active.iter().skip(a_pos + 1) {
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                let d = dist[&(lo, hi)];
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((lo, hi, d));
                }
            }
        }
        let (a, b, d) = best.expect("at least one active pair");

        let new_id = n + step;
        let size_a = sizes[&a];
        let size_b = sizes[&b];
        let merged_size = size_a + size_b;

        // Average-linkage update: distance from the merged cluster to every
        // other active cluster is the leaf-count-weighted mean.
        for &other in &active {
            if other == a || other == b {
                continue;
            }
            let d_a = dist[&key(a, other)];
            let d_b = dist[&key(b, other)];
            let d_new = (size_a as f64 * d_a + size_b as f64 * d_b) / merged_size as f64;
            dist.insert(key(new_id, other), d_new);
        }

        active.retain(|&c| c != a && c != b);
        active.push(new_id);
        sizes.insert(new_id, merged_size);

        linkage.push(LinkageRow {
            left: a,
            right: b,
            distance: d,
            size: merged_size,
        });
    }

    linkage
}

fn key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Depth-first leaf ordering of the dendrogram described by `linkage`.
///
/// The root is the last merge; left children are visited before right
/// children. With fewer than 2 leaves the identity order is returned.
pub fn leaf_order(linkage: &[LinkageRow], n_leaves: usize) -> Vec<usize> {
    if linkage.is_empty() {
        return (0..n_leaves).collect();
    }
    let root = n_leaves + linkage.len() - 1;
    let mut order = Vec::with_capacity(n_leaves);
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node < n_leaves {
            order.push(node);
        } else {
            let row = &linkage[node - n_leaves];
            // Push right first so the left subtree is emitted first.
            stack.push(row.right);
            stack.push(row.left);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn test_upgma_three_leaves() {
        // Leaves 0 and 1 are close; 2 is distant.
        let d = arr2(&[[0.0, 0.1, 0.8], [0.1, 0.0, 0.9], [0.8, 0.9, 0.0]]);
        let linkage = upgma(&d);
        assert_eq!(linkage.len(), 2);

        assert_eq!((linkage[0].left, linkage[0].right), (0, 1));
        assert_relative_eq!(linkage[0].distance, 0.1);
        assert_eq!(linkage[0].size, 2);

        // {0,1} merges with 2 at the average of 0.8 and 0.9.
        assert_eq!((linkage[1].left, linkage[1].right), (2, 3));
        assert_relative_eq!(linkage[1].distance, 0.85);
        assert_eq!(linkage[1].size, 3);
    }

    #[test]
    fn test_upgma_tie_breaks_to_smallest_pair() {
        // All pairs equidistant: (0, 1) must merge first.
        let d = arr2(&[[0.0, 0.5, 0.5], [0.5, 0.0, 0.5], [0.5, 0.5, 0.0]]);
        let linkage = upgma(&d);
        assert_eq!((linkage[0].left, linkage[0].right), (0, 1));
    }

    #[test]
    fn test_upgma_single_leaf() {
        let d = arr2(&[[0.0]]);
        assert!(upgma(&d).is_empty());
        assert_eq!(leaf_order(&[], 1), vec![0]);
    }

    #[test]
    fn test_leaf_order_covers_all_leaves() {
        let d = arr2(&[
            [0.0, 0.2, 0.7, 0.9],
            [0.2, 0.0, 0.8, 0.9],
            [0.7, 0.8, 0.0, 0.3],
            [0.9, 0.9, 0.3, 0.0],
        ]);
        let linkage = upgma(&d);
        assert_eq!(linkage.len(), 3);
        let mut order = leaf_order(&linkage, 4);
        assert_eq!(order.len(), 4);
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
