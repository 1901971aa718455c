//! sqlite-vec backed vector index
//!
//! Embedding metadata lives in the `embeddings` table; the vector itself is
//! written to the `vec_knowledge` vec0 virtual table keyed by embedding id.
//! Queries join back through content variants and knowledge objects so
//! tenant and archive filters apply at the SQL layer.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::{diversify_matches, SimilarMatch, VectorFilters, VectorIndex, VectorRecord};
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { pool, embedder }
    }

    /// Serialize an embedding as f32 little-endian bytes for sqlite-vec.
    fn vector_bytes(vector: &[f32]) -> Vec<u8> {
        vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn store(&self, record: VectorRecord<'_>) -> Result<String> {
        let model = self.embedder.model().to_string();
        let snippet: String = record.text.chars().take(200).collect();

        // One embedding per (variant, model); replace the vector on re-store.
        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM embeddings WHERE variant_id = ? AND model = ?")
                .bind(record.variant_id)
                .bind(&model)
                .fetch_optional(&self.pool)
                .await?;

        let embedding_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO embeddings (id, variant_id, model, text_snippet, created_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(record.variant_id)
                .bind(&model)
                .bind(&snippet)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
                id
            }
        };

        sqlx::query("DELETE FROM vec_knowledge WHERE embedding_id = ?")
            .bind(&embedding_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO vec_knowledge (embedding_id, embedding) VALUES (?, ?)")
            .bind(&embedding_id)
            .bind(Self::vector_bytes(record.vector))
            .execute(&self.pool)
            .await?;

        Ok(embedding_id)
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
        let embedding_bytes = Self::vector_bytes(&query_vec);

        // Over-fetch when diversifying so the re-selection has material
        let fetch_limit = if diversify { (k * 3).max(10) } else { k } as i64;

        let mut sql = String::from(
            "SELECT o.id AS object_id, v.id AS variant_id, v.content AS content, \
             o.metadata AS metadata, \
             vec_distance_cosine(vk.embedding, ?) AS distance \
             FROM vec_knowledge vk \
             JOIN embeddings e ON e.id = vk.embedding_id \
             JOIN content_variants v ON v.id = e.variant_id \
             JOIN knowledge_objects o ON o.id = v.knowledge_object_id \
             WHERE o.tenant_id = ? AND o.archived = 0",
        );
        if filters.object_type.is_some() {
            sql.push_str(" AND o.object_type = ?");
        }
        sql.push_str(" ORDER BY distance ASC LIMIT ?");

        let mut query = sqlx::query(&sql)
            .bind(embedding_bytes)
            .bind(&filters.tenant_id);
        if let Some(object_type) = filters.object_type {
            query = query.bind(object_type.to_string());
        }
        query = query.bind(fetch_limit);

        let rows = query.fetch_all(&self.pool).await?;

        let matches: Vec<SimilarMatch> = rows
            .iter()
            .map(|row| {
                let distance: f64 = row.try_get("distance")?;
                let metadata: String = row.try_get("metadata")?;
                Ok(SimilarMatch {
                    object_id: row.try_get("object_id")?,
                    variant_id: row.try_get("variant_id")?,
                    // Cosine distance → similarity (higher = closer)
                    score: (1.0 - distance).clamp(0.0, 1.0),
                    text: row.try_get("content")?,
                    metadata: serde_json::from_str(&metadata)?,
                })
            })
            .collect::<Result<_>>()?;

        if diversify {
            Ok(diversify_matches(matches, k, diversity))
        } else {
            Ok(matches)
        }
    }

    async fn delete(&self, embedding_id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM vec_knowledge WHERE embedding_id = ?")
            .bind(embedding_id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM embeddings WHERE id = ?")
            .bind(embedding_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health(&self) -> Result<()> {
        sqlx::query("SELECT COUNT(*) FROM vec_knowledge")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
