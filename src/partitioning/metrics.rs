//! Partition quality metrics.
//!
//! Edge cut and load imbalance of a part assignment over a [`GlobalGraph`].
//! Used for logging after refinement and in tests.

use super::GlobalGraph;

/// Number of undirected edges whose endpoints lie in different parts (O(E)).
///
/// Each undirected edge appears twice in the CSR arrays and is counted once.
pub fn edge_cut(g: &GlobalGraph, parts: &[usize]) -> usize {
    (0..g.vertex_count())
        .flat_map(|u| g.neighbours(u).iter().map(move |&v| (u, v)))
        .filter(|&(u, v)| u < v && parts[u] != parts[v])
        .count()
}

/// Total vertex weight per part.
pub fn part_weights(g: &GlobalGraph, parts: &[usize], n_parts: usize) -> Vec<usize> {
    let mut w = vec![0usize; n_parts];
    for (v, &p) in parts.iter().enumerate() {
        w[p] += g.vwgt[v];
    }
    w
}

/// Heaviest part relative to the mean part weight; 1.0 is perfect balance.
pub fn imbalance(weights: &[usize]) -> f64 {
    let total: usize = weights.iter().sum();
    if total == 0 || weights.is_empty() {
        return 1.0;
    }
    let mean = total as f64 / weights.len() as f64;
    weights.iter().copied().max().unwrap_or(0) as f64 / mean
}
