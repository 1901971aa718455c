//! Relationship discoverer
//!
//! Finds similarity-derived edges between a newly stored knowledge object
//! and its tenant's existing objects. Eventually consistent by design:
//! discovery runs after the client already has its response, and a failed
//! run simply yields zero edges.

use std::sync::Arc;

use crate::error::Result;
use crate::knowledge::{KnowledgeStore, RelationshipType};
use crate::vector::{VectorFilters, VectorIndex};

const DETECTED_BY: &str = "RelationshipDiscoverer";

/// Neighbors fetched per source object
const NEIGHBOR_LIMIT: usize = 10;

/// Diversity applied to the neighbor query
const NEIGHBOR_DIVERSITY: f64 = 0.3;

/// Similarity bands mapped to relationship types, checked top-down.
/// The CONTRADICTS band for mid-low similarity is deliberate legacy
/// behavior; deployments can override the table.
#[derive(Debug, Clone)]
pub struct SimilarityBands {
    pub supports_above: f64,
    pub references_above: f64,
    pub contradicts_above: f64,
}

impl Default for SimilarityBands {
    fn default() -> Self {
        Self {
            supports_above: 0.8,
            references_above: 0.6,
            contradicts_above: 0.4,
        }
    }
}

impl SimilarityBands {
    pub fn classify(&self, score: f64) -> RelationshipType {
        if score > self.supports_above {
            RelationshipType::Supports
        } else if score > self.references_above {
            RelationshipType::References
        } else if score > self.contradicts_above {
            RelationshipType::Contradicts
        } else {
            RelationshipType::References
        }
    }
}

#[derive(Clone)]
pub struct RelationshipDiscoverer {
    store: KnowledgeStore,
    index: Arc<dyn VectorIndex>,
    bands: SimilarityBands,
}

impl RelationshipDiscoverer {
    pub fn new(store: KnowledgeStore, index: Arc<dyn VectorIndex>, bands: SimilarityBands) -> Self {
        Self {
            store,
            index,
            bands,
        }
    }

    /// Discover and persist edges for one object. Returns the number of
    /// edges inserted; duplicates on `(source, target, type)` are suppressed.
    pub async fn discover(&self, object_id: &str, tenant_id: &str) -> Result<usize> {
        let Some(variant) = self.store.preferred_variant(object_id).await? else {
            return Ok(0);
        };

        let filters = VectorFilters::tenant(tenant_id);
        let matches = self
            .index
            .find_similar(
                &variant.content,
                NEIGHBOR_LIMIT,
                &filters,
                true,
                NEIGHBOR_DIVERSITY,
            )
            .await?;

        let mut inserted = 0usize;
        for m in matches {
            if m.object_id == object_id {
                continue;
            }
            let rel_type = self.bands.classify(m.score);
            let evidence = format!("Vector similarity: {:.4}", m.score);
            if self
                .store
                .upsert_relationship(
                    object_id,
                    &m.object_id,
                    rel_type,
                    m.score,
                    &evidence,
                    DETECTED_BY,
                )
                .await?
            {
                inserted += 1;
            }
        }

        Ok(inserted)
    }

    /// Discover edges for a batch of objects. One object's failure is
    /// logged and contributes zero edges; the rest proceed.
    pub async fn discover_batch(&self, object_ids: &[String], tenant_id: &str) -> usize {
        let mut total = 0usize;
        for object_id in object_ids {
            match self.discover(object_id, tenant_id).await {
                Ok(count) => total += count,
                Err(e) => {
                    tracing::warn!(
                        tenant_id,
                        object_id,
                        error = %e,
                        "relationship discovery failed"
                    );
                }
            }
        }
        total
    }

    /// Remove edges older than the freshness cutoff.
    pub async fn cleanup_older_than(&self, days: i64) -> Result<u64> {
        self.store.cleanup_relationships_older_than(days).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_classification_matches_thresholds() {
        let bands = SimilarityBands::default();
        assert_eq!(bands.classify(0.95), RelationshipType::Supports);
        assert_eq!(bands.classify(0.8), RelationshipType::References);
        assert_eq!(bands.classify(0.7), RelationshipType::References);
        assert_eq!(bands.classify(0.6), RelationshipType::Contradicts);
        assert_eq!(bands.classify(0.5), RelationshipType::Contradicts);
        assert_eq!(bands.classify(0.4), RelationshipType::References);
        assert_eq!(bands.classify(0.1), RelationshipType::References);
    }
}
