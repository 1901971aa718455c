//! Maximal Marginal Relevance selection
//!
//! Balances relevance against intra-set redundancy. Content similarity is
//! token-set Jaccard, which is cheap and good enough for short knowledge
//! snippets. Selection is deterministic: ties fall back to raw relevance,
//! then to creation time, then to id.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// One selectable item
#[derive(Debug, Clone)]
pub struct MmrCandidate {
    pub id: String,
    pub relevance: f64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Token-set Jaccard similarity of two texts, case-insensitive.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Select up to `max_selected` candidates with MMR parameter `λ = 1 − diversity`.
///
/// The selected set is seeded with the single highest-relevance candidate;
/// every subsequent pick maximizes `λ·relevance + (1−λ)·(1 − maxSim(c, selected))`.
/// Returns indices into `candidates` in selection order.
pub fn select(candidates: &[MmrCandidate], diversity: f64, max_selected: usize) -> Vec<usize> {
    if candidates.is_empty() || max_selected == 0 {
        return Vec::new();
    }
    let lambda = 1.0 - diversity.clamp(0.0, 1.0);

    // Stable ordering for deterministic tie-breaks
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .relevance
            .partial_cmp(&candidates[a].relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| candidates[a].created_at.cmp(&candidates[b].created_at))
            .then_with(|| candidates[a].id.cmp(&candidates[b].id))
    });

    let mut selected: Vec<usize> = vec![order[0]];
    let mut remaining: Vec<usize> = order[1..].to_vec();

    while selected.len() < max_selected && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_key = (f64::NEG_INFINITY, f64::NEG_INFINITY);

        for (pos, &idx) in remaining.iter().enumerate() {
            let cand = &candidates[idx];
            let max_sim = selected
                .iter()
                .map(|&s| token_jaccard(&cand.text, &candidates[s].text))
                .fold(0.0f64, f64::max);
            let mmr = lambda * cand.relevance + (1.0 - lambda) * (1.0 - max_sim);
            // Tie-break on raw relevance; `remaining` is already ordered by
            // (relevance, created_at, id), so strict `>` keeps it stable
            let key = (mmr, cand.relevance);
            if key.0 > best_key.0 || (key.0 == best_key.0 && key.1 > best_key.1) {
                best_key = key;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, relevance: f64, text: &str) -> MmrCandidate {
        MmrCandidate {
            id: id.to_string(),
            relevance,
            text: text.to_string(),
            created_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn jaccard_identical_text() {
        assert!((token_jaccard("the quick fox", "the quick fox") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_disjoint_text() {
        assert_eq!(token_jaccard("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn seeds_with_highest_relevance() {
        let candidates = vec![
            cand("a", 0.5, "one"),
            cand("b", 0.9, "two"),
            cand("c", 0.7, "three"),
        ];
        let selected = select(&candidates, 0.3, 2);
        assert_eq!(selected[0], 1);
    }

    #[test]
    fn high_diversity_skips_near_duplicates() {
        // Five near-duplicates and one distinct lower scorer; with heavy
        // diversity the distinct one must beat the second duplicate.
        let candidates = vec![
            cand("k1", 0.95, "paris is the capital of france"),
            cand("k2", 0.94, "paris is the capital city of france"),
            cand("k3", 0.93, "the capital of france is paris"),
            cand("k4", 0.92, "france capital paris is the"),
            cand("k5", 0.91, "paris capital france is the of"),
            cand("k6", 0.80, "berlin has excellent museums and galleries"),
        ];
        let selected = select(&candidates, 0.9, 2);
        assert_eq!(selected[0], 0);
        assert_eq!(selected[1], 5);
    }

    #[test]
    fn zero_diversity_is_pure_relevance_order() {
        let candidates = vec![
            cand("a", 0.9, "same words here"),
            cand("b", 0.8, "same words here"),
            cand("c", 0.7, "different entirely"),
        ];
        let selected = select(&candidates, 0.0, 3);
        assert_eq!(selected, vec![0, 1, 2]);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let candidates = vec![
            cand("a", 0.9, "alpha beta gamma"),
            cand("b", 0.85, "alpha beta delta"),
            cand("c", 0.8, "epsilon zeta eta"),
        ];
        let first = select(&candidates, 0.5, 3);
        let second = select(&candidates, 0.5, 3);
        assert_eq!(first, second);
    }
}
