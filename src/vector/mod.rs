//! Vector index abstraction
//!
//! The index stores embeddings anchored to content variants and answers
//! top-K similarity queries. Scores are always normalized so that higher
//! means more similar; distance-based backends translate before returning.
//! Backends: sqlite-vec (default) and an in-memory index for local mode.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::knowledge::ObjectType;

pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

/// Everything the index needs to know about one stored embedding.
#[derive(Debug, Clone)]
pub struct VectorRecord<'a> {
    pub object_id: &'a str,
    pub variant_id: &'a str,
    pub tenant_id: &'a str,
    pub object_type: ObjectType,
    pub text: &'a str,
    pub vector: &'a [f32],
    /// Owning object's metadata, echoed back on matches
    pub metadata: &'a serde_json::Value,
}

/// Query-side filters. Tenant scoping is mandatory.
#[derive(Debug, Clone)]
pub struct VectorFilters {
    pub tenant_id: String,
    pub object_type: Option<ObjectType>,
}

impl VectorFilters {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            object_type: None,
        }
    }
}

/// One similarity match. `score` is cosine similarity in [0, 1], higher = closer.
#[derive(Debug, Clone)]
pub struct SimilarMatch {
    pub object_id: String,
    pub variant_id: String,
    pub score: f64,
    pub text: String,
    /// Owning object's metadata
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store an embedding; returns the embedding id.
    async fn store(&self, record: VectorRecord<'_>) -> Result<String>;

    /// Top-`k` matches for `query_text`, filtered to the tenant (and type,
    /// when set) and excluding archived objects. With `diversify`, results
    /// are re-selected for diversity with the given `diversity` in [0, 1].
    async fn find_similar(
        &self,
        query_text: &str,
        k: usize,
        filters: &VectorFilters,
        diversify: bool,
        diversity: f64,
    ) -> Result<Vec<SimilarMatch>>;

    /// Remove one embedding. Returns whether anything was deleted.
    async fn delete(&self, embedding_id: &str) -> Result<bool>;

    /// Backend liveness.
    async fn health(&self) -> Result<()>;
}

/// Cosine similarity between two vectors, normalized into [0, 1].
///
/// Returns 0 for zero-magnitude inputs.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    // Map [-1, 1] onto [0, 1] so callers can treat scores uniformly
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Greedy diversity re-selection over already-ranked matches.
///
/// Keeps the top match, then repeatedly picks the candidate maximizing
/// `λ·score + (1−λ)·(1 − maxTextOverlap)` with `λ = 1 − diversity`.
pub(crate) fn diversify_matches(
    matches: Vec<SimilarMatch>,
    k: usize,
    diversity: f64,
) -> Vec<SimilarMatch> {
    use crate::context::mmr::token_jaccard;

    if matches.len() <= 1 {
        return matches;
    }
    let lambda = 1.0 - diversity.clamp(0.0, 1.0);
    let mut remaining: Vec<SimilarMatch> = matches;
    let mut selected: Vec<SimilarMatch> = Vec::with_capacity(k);
    // Seed with the best-scoring match
    remaining.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    selected.push(remaining.remove(0));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (i, cand) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| token_jaccard(&cand.text, &s.text))
                .fold(0.0f64, f64::max);
            let mmr = lambda * cand.score + (1.0 - lambda) * (1.0 - max_sim);
            if mmr > best_score + f64::EPSILON {
                best_score = mmr;
                best_idx = i;
            }
        }
        selected.push(remaining.remove(best_idx));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.5f32, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_half() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let a = vec![0.0f32, 0.0];
        let b = vec![1.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
