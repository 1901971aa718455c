//! Persistence for knowledge objects, content variants, and relationships
//!
//! All reads are tenant-scoped and exclude archived objects. Relationship
//! reads additionally exclude edges whose endpoints are archived or gone.

use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::knowledge::types::{
    ContentVariant, KnowledgeObject, KnowledgeRelationship, ObjectType, RelationshipType,
};

/// Store for the knowledge graph tables
#[derive(Clone)]
pub struct KnowledgeStore {
    pool: SqlitePool,
}

fn object_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeObject> {
    let object_type: String = row.try_get("object_type")?;
    let tags: String = row.try_get("tags")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(KnowledgeObject {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        object_type: object_type.parse().map_err(Error::Other)?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        parent_id: row.try_get("parent_id")?,
        tags: serde_json::from_str(&tags)?,
        metadata: serde_json::from_str(&metadata)?,
        archived: row.try_get::<i64, _>("archived")? != 0,
        original_tokens: row.try_get("original_tokens")?,
        created_at: row.try_get("created_at")?,
    })
}

fn variant_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ContentVariant> {
    let variant: String = row.try_get("variant")?;
    Ok(ContentVariant {
        id: row.try_get("id")?,
        knowledge_object_id: row.try_get("knowledge_object_id")?,
        variant: variant.parse().map_err(Error::Other)?,
        content: row.try_get("content")?,
        tokens: row.try_get("tokens")?,
        created_at: row.try_get("created_at")?,
    })
}

fn relationship_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeRelationship> {
    let rel_type: String = row.try_get("rel_type")?;
    Ok(KnowledgeRelationship {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        target_id: row.try_get("target_id")?,
        rel_type: rel_type.parse().map_err(Error::Other)?,
        confidence: row.try_get("confidence")?,
        evidence: row.try_get("evidence")?,
        detected_by: row.try_get("detected_by")?,
        created_at: row.try_get("created_at")?,
    })
}

impl KnowledgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a knowledge object together with one content variant.
    pub async fn create_object_with_variant(
        &self,
        object: &KnowledgeObject,
        variant: &ContentVariant,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_object(&mut tx, object).await?;
        Self::insert_variant(&mut tx, variant).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Attach an additional variant to an existing object.
    pub async fn add_variant(&self, variant: &ContentVariant) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_variant(&mut tx, variant).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Persist the two TURN objects of one exchange atomically.
    ///
    /// Either both turns (with their RAW variants) are committed or neither is.
    pub async fn create_turn_pair(
        &self,
        user_turn: (&KnowledgeObject, &ContentVariant),
        assistant_turn: (&KnowledgeObject, &ContentVariant),
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_object(&mut tx, user_turn.0).await?;
        Self::insert_variant(&mut tx, user_turn.1).await?;
        Self::insert_object(&mut tx, assistant_turn.0).await?;
        Self::insert_variant(&mut tx, assistant_turn.1).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_object(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        object: &KnowledgeObject,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_objects
                (id, tenant_id, object_type, session_id, user_id, parent_id,
                 tags, metadata, archived, original_tokens, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&object.id)
        .bind(&object.tenant_id)
        .bind(object.object_type.to_string())
        .bind(&object.session_id)
        .bind(&object.user_id)
        .bind(&object.parent_id)
        .bind(serde_json::to_string(&object.tags)?)
        .bind(serde_json::to_string(&object.metadata)?)
        .bind(object.archived as i64)
        .bind(object.original_tokens)
        .bind(object.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_variant(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        variant: &ContentVariant,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_variants
                (id, knowledge_object_id, variant, content, tokens, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&variant.id)
        .bind(&variant.knowledge_object_id)
        .bind(variant.variant.to_string())
        .bind(&variant.content)
        .bind(variant.tokens)
        .bind(variant.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Fetch one non-archived object owned by the tenant.
    pub async fn get_object(&self, tenant_id: &str, id: &str) -> Result<Option<KnowledgeObject>> {
        let row = sqlx::query(
            "SELECT * FROM knowledge_objects WHERE id = ? AND tenant_id = ? AND archived = 0",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(object_from_row).transpose()
    }

    /// Fetch a set of non-archived objects owned by the tenant.
    pub async fn get_objects(&self, tenant_id: &str, ids: &[String]) -> Result<Vec<KnowledgeObject>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
        let sql = format!(
            "SELECT * FROM knowledge_objects \
             WHERE tenant_id = ? AND archived = 0 AND id IN ({})",
            placeholders.join(",")
        );

        let mut query = sqlx::query(&sql).bind(tenant_id);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(object_from_row).collect()
    }

    /// Objects created in a session, oldest first. Used by summarization.
    pub async fn list_session_turns(
        &self,
        tenant_id: &str,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<(KnowledgeObject, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT o.*, v.content AS raw_content
            FROM knowledge_objects o
            JOIN content_variants v
              ON v.knowledge_object_id = o.id AND v.variant = 'RAW'
            WHERE o.tenant_id = ? AND o.session_id = ? AND o.object_type = 'TURN'
              AND o.archived = 0
            ORDER BY o.created_at DESC, o.id DESC
            LIMIT ?
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in &rows {
            let content: String = row.try_get("raw_content")?;
            turns.push((object_from_row(row)?, content));
        }
        // Oldest first for prompt assembly
        turns.reverse();
        Ok(turns)
    }

    /// Fetch the preferred display variant for one object:
    /// SHORT if present, else RAW, else the first available.
    pub async fn preferred_variant(&self, object_id: &str) -> Result<Option<ContentVariant>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM content_variants
            WHERE knowledge_object_id = ?
            ORDER BY CASE variant
                WHEN 'SHORT' THEN 0
                WHEN 'RAW' THEN 1
                ELSE 2
            END, created_at ASC
            LIMIT 1
            "#,
        )
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(variant_from_row).transpose()
    }

    /// Upsert a relationship on its natural key `(source, target, type)`.
    ///
    /// Returns true if a new edge was inserted, false if it already existed.
    pub async fn upsert_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: RelationshipType,
        confidence: f64,
        evidence: &str,
        detected_by: &str,
    ) -> Result<bool> {
        if source_id == target_id {
            return Err(Error::BadRequest("relationship endpoints must differ".into()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO knowledge_relationships
                (id, source_id, target_id, rel_type, confidence, evidence, detected_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_id, target_id, rel_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(source_id)
        .bind(target_id)
        .bind(rel_type.to_string())
        .bind(confidence)
        .bind(evidence)
        .bind(detected_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Relationships touching an object, excluding edges whose endpoints are
    /// archived or deleted.
    pub async fn relationships_for(
        &self,
        tenant_id: &str,
        object_id: &str,
    ) -> Result<Vec<KnowledgeRelationship>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM knowledge_relationships r
            JOIN knowledge_objects s ON s.id = r.source_id
            JOIN knowledge_objects t ON t.id = r.target_id
            WHERE (r.source_id = ? OR r.target_id = ?)
              AND s.tenant_id = ? AND t.tenant_id = ?
              AND s.archived = 0 AND t.archived = 0
            ORDER BY r.confidence DESC
            "#,
        )
        .bind(object_id)
        .bind(object_id)
        .bind(tenant_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(relationship_from_row).collect()
    }

    /// Remove relationships older than the freshness cutoff.
    pub async fn cleanup_relationships_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM knowledge_relationships WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count of TURN objects for a tenant, used by tests and diagnostics.
    pub async fn count_objects(&self, tenant_id: &str, object_type: ObjectType) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM knowledge_objects \
             WHERE tenant_id = ? AND object_type = ? AND archived = 0",
        )
        .bind(tenant_id)
        .bind(object_type.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// List non-archived objects of a type for a tenant, newest first.
    pub async fn list_objects(
        &self,
        tenant_id: &str,
        object_type: ObjectType,
        limit: i64,
    ) -> Result<Vec<KnowledgeObject>> {
        let rows = sqlx::query(
            "SELECT * FROM knowledge_objects \
             WHERE tenant_id = ? AND object_type = ? AND archived = 0 \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(object_type.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(object_from_row).collect()
    }

    /// Archive an object, removing it from every read path.
    pub async fn archive_object(&self, tenant_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE knowledge_objects SET archived = 1 WHERE id = ? AND tenant_id = ?",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
