//! Multi-party swap chain detection.
//!
//! Pending requests form a directed graph where an edge A -> B means "A
//! wants the week B is giving up". Cycles up to the configured length are
//! chain candidates; a cycle is executable only when every edge clears the
//! compatibility threshold and the concatenated move set re-validates.

use std::collections::HashMap;

/// A directed edge between request indices with its compatibility score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainEdge {
    pub from: usize,
    pub to: usize,
    pub score: f64,
}

/// A cycle of request indices (each node wants what the next has).
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub members: Vec<usize>,
    /// Lowest edge score along the cycle.
    pub weakest_score: f64,
}

/// Find simple cycles of length 2..=`max_len` whose edges all clear
/// `min_score`. Each cycle is reported once, rotated so the smallest index
/// leads.
pub fn find_chains(edges: &[ChainEdge], max_len: usize, min_score: f64) -> Vec<Chain> {
    let mut adjacency: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
    for edge in edges {
        if edge.score >= min_score {
            adjacency.entry(edge.from).or_default().push((edge.to, edge.score));
        }
    }
    let mut nodes: Vec<usize> = adjacency.keys().copied().collect();
    nodes.sort_unstable();

    let mut chains = Vec::new();
    for &start in &nodes {
        let mut path = vec![start];
        let mut scores = Vec::new();
        dfs(start, start, &adjacency, max_len, &mut path, &mut scores, &mut chains);
    }
    chains.sort_by(|a, b| {
        b.weakest_score
            .partial_cmp(&a.weakest_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    chains
}

fn dfs(
    start: usize,
    current: usize,
    adjacency: &HashMap<usize, Vec<(usize, f64)>>,
    max_len: usize,
    path: &mut Vec<usize>,
    scores: &mut Vec<f64>,
    chains: &mut Vec<Chain>,
) {
    let neighbors = match adjacency.get(&current) {
        Some(n) => n,
        None => return,
    };
    for &(next, score) in neighbors {
        if next == start && path.len() >= 2 {
            let weakest = scores
                .iter()
                .copied()
                .chain(std::iter::once(score))
                .fold(f64::INFINITY, f64::min);
            chains.push(Chain {
                members: path.clone(),
                weakest_score: weakest,
            });
            continue;
        }
        // Canonical rotation: only explore nodes above the start index, so
        // each cycle is emitted exactly once.
        if next <= start || path.contains(&next) || path.len() >= max_len {
            continue;
        }
        path.push(next);
        scores.push(score);
        dfs(start, next, adjacency, max_len, path, scores, chains);
        path.pop();
        scores.pop();
    }
}
