//! In-memory vector index
//!
//! Brute-force cosine search over a concurrent map. Used in local mode and
//! by the test suite; not intended for large corpora.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{cosine_similarity, diversify_matches, SimilarMatch, VectorFilters, VectorIndex, VectorRecord};
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::knowledge::ObjectType;

struct Entry {
    object_id: String,
    variant_id: String,
    tenant_id: String,
    object_type: ObjectType,
    text: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

pub struct MemoryVectorIndex {
    entries: DashMap<String, Entry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MemoryVectorIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: DashMap::new(),
            embedder,
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn store(&self, record: VectorRecord<'_>) -> Result<String> {
        // One embedding per variant: replace any previous entry for it
        let previous: Option<String> = self
            .entries
            .iter()
            .find(|e| e.value().variant_id == record.variant_id)
            .map(|e| e.key().clone());
        if let Some(key) = previous {
            self.entries.remove(&key);
        }

        let id = Uuid::new_v4().to_string();
        self.entries.insert(
            id.clone(),
            Entry {
                object_id: record.object_id.to_string(),
                variant_id: record.variant_id.to_string(),
                tenant_id: record.tenant_id.to_string(),
                object_type: record.object_type,
                text: record.text.to_string(),
                vector: record.vector.to_vec(),
                metadata: record.metadata.clone(),
            },
        );
        Ok(id)
    }

    async fn find_similar(
        &self,
        query_text: &str,
        k: usize,
        filters: &VectorFilters,
        diversify: bool,
        diversity: f64,
    ) -> Result<Vec<SimilarMatch>> {
        let query_vec = self.embedder.embed(query_text).await?;

        let mut matches: Vec<SimilarMatch> = self
            .entries
            .iter()
            .filter(|e| e.value().tenant_id == filters.tenant_id)
            .filter(|e| {
                filters
                    .object_type
                    .map(|t| e.value().object_type == t)
                    .unwrap_or(true)
            })
            .map(|e| SimilarMatch {
                object_id: e.value().object_id.clone(),
                variant_id: e.value().variant_id.clone(),
                score: cosine_similarity(&query_vec, &e.value().vector),
                text: e.value().text.clone(),
                metadata: e.value().metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.object_id.cmp(&b.object_id))
        });

        if diversify {
            Ok(diversify_matches(matches, k, diversity))
        } else {
            matches.truncate(k);
            Ok(matches)
        }
    }

    async fn delete(&self, embedding_id: &str) -> Result<bool> {
        Ok(self.entries.remove(embedding_id).is_some())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
