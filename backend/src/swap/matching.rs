//! Matching algorithms over pending swap requests.
//!
//! Three pluggable matchers, tried in order of strength: exact mutual pairs,
//! maximum-weight matching over the compatibility graph, and Gale-Shapley
//! stable matching for preference-based pairing. The weight matching is
//! exact (bitmask dynamic program) up to sixteen requests and degrades to
//! greedy weight-descending pairing beyond that.

use std::collections::HashMap;

/// A scored undirected candidate pair of request indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
    pub a: usize,
    pub b: usize,
    pub score: f64,
}

/// Exact mutual matches: pairs whose compatibility is a perfect 1.0.
pub fn exact_mutual_matches(pairs: &[ScoredPair]) -> Vec<ScoredPair> {
    pairs
        .iter()
        .filter(|p| p.score >= 1.0 - 1e-9)
        .copied()
        .collect()
}

/// Maximum-weight matching over the pair graph.
///
/// Requests are graph nodes; `pairs` carries the edge weights. Pairs below
/// `min_score` never match. Returns chosen pairs, highest weight first.
pub fn maximum_weight_matching(
    node_count: usize,
    pairs: &[ScoredPair],
    min_score: f64,
) -> Vec<ScoredPair> {
    let eligible: Vec<ScoredPair> = pairs
        .iter()
        .filter(|p| p.score >= min_score && p.a != p.b)
        .copied()
        .collect();
    let mut result = if node_count <= 16 {
        exact_matching_dp(node_count, &eligible)
    } else {
        greedy_matching(&eligible)
    };
    result.sort_by(|x, y| y.score.partial_cmp(&x.score).unwrap_or(std::cmp::Ordering::Equal));
    result
}

/// Exact matching by dynamic programming over node subsets.
fn exact_matching_dp(node_count: usize, pairs: &[ScoredPair]) -> Vec<ScoredPair> {
    let mut weight: HashMap<(usize, usize), f64> = HashMap::new();
    for p in pairs {
        let key = (p.a.min(p.b), p.a.max(p.b));
        let entry = weight.entry(key).or_insert(p.score);
        if p.score > *entry {
            *entry = p.score;
        }
    }

    let full = 1usize << node_count;
    // dp[mask] = (best total weight, chosen pair leading here)
    let mut dp: Vec<f64> = vec![0.0; full];
    let mut choice: Vec<Option<(usize, usize)>> = vec![None; full];
    let mut parent: Vec<usize> = vec![0; full];

    for mask in 1..full {
        // Skip masks that are not reachable improvements.
        let first = mask.trailing_zeros() as usize;
        // Option 1: leave `first` unmatched.
        let without = mask & !(1 << first);
        dp[mask] = dp[without];
        choice[mask] = None;
        parent[mask] = without;
        // Option 2: match `first` with any other set node.
        for second in (first + 1)..node_count {
            if mask & (1 << second) == 0 {
                continue;
            }
            if let Some(&w) = weight.get(&(first, second)) {
                let rest = mask & !(1 << first) & !(1 << second);
                if dp[rest] + w > dp[mask] {
                    dp[mask] = dp[rest] + w;
                    choice[mask] = Some((first, second));
                    parent[mask] = rest;
                }
            }
        }
    }

    let mut result = Vec::new();
    let mut mask = full - 1;
    while mask != 0 {
        if let Some((a, b)) = choice[mask] {
            result.push(ScoredPair {
                a,
                b,
                score: weight[&(a, b)],
            });
        }
        mask = parent[mask];
    }
    result
}

/// Greedy fallback: take edges in descending weight, skipping used nodes.
fn greedy_matching(pairs: &[ScoredPair]) -> Vec<ScoredPair> {
    let mut sorted: Vec<ScoredPair> = pairs.to_vec();
    sorted.sort_by(|x, y| y.score.partial_cmp(&x.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut used: Vec<usize> = Vec::new();
    let mut result = Vec::new();
    for pair in sorted {
        if used.contains(&pair.a) || used.contains(&pair.b) {
            continue;
        }
        used.push(pair.a);
        used.push(pair.b);
        result.push(pair);
    }
    result
}

/// Gale-Shapley stable matching.
///
/// `proposer_prefs[i]` ranks acceptor indices best-first; likewise for
/// acceptors over proposers. Returns (proposer, acceptor) pairs. The result
/// is stable: no proposer/acceptor pair mutually prefers each other over
/// their assigned partners.
pub fn stable_matching(
    proposer_prefs: &[Vec<usize>],
    acceptor_prefs: &[Vec<usize>],
) -> Vec<(usize, usize)> {
    let proposer_count = proposer_prefs.len();
    let acceptor_count = acceptor_prefs.len();

    // acceptor_rank[acceptor][proposer] = position in the acceptor's list.
    let acceptor_rank: Vec<HashMap<usize, usize>> = acceptor_prefs
        .iter()
        .map(|prefs| prefs.iter().enumerate().map(|(rank, &p)| (p, rank)).collect())
        .collect();

    let mut next_proposal: Vec<usize> = vec![0; proposer_count];
    let mut engaged_to: Vec<Option<usize>> = vec![None; acceptor_count];
    let mut free: Vec<usize> = (0..proposer_count).rev().collect();

    while let Some(proposer) = free.pop() {
        let prefs = &proposer_prefs[proposer];
        if next_proposal[proposer] >= prefs.len() {
            continue;
        }
        let acceptor = prefs[next_proposal[proposer]];
        next_proposal[proposer] += 1;

        match engaged_to.get(acceptor).copied().flatten() {
            None => {
                if acceptor_rank[acceptor].contains_key(&proposer) {
                    engaged_to[acceptor] = Some(proposer);
                } else {
                    free.push(proposer);
                }
            }
            Some(current) => {
                let rank_new = acceptor_rank[acceptor].get(&proposer);
                let rank_current = acceptor_rank[acceptor].get(&current);
                match (rank_new, rank_current) {
                    (Some(new), Some(cur)) if new < cur => {
                        engaged_to[acceptor] = Some(proposer);
                        free.push(current);
                    }
                    _ => free.push(proposer),
                }
            }
        }
    }

    engaged_to
        .into_iter()
        .enumerate()
        .filter_map(|(acceptor, proposer)| proposer.map(|p| (p, acceptor)))
        .collect()
}
