//! Ingestion pipeline
//!
//! Turns one finished exchange into durable knowledge: persist the two TURN
//! objects (transactionally), fold the exchange into the dialogue state,
//! then enrich asynchronously with embeddings, extracted memories, session
//! summaries, and discovered relationships. Only the turn-persistence step
//! can fail the pipeline; everything after it is logged and continued.

pub mod worker;

use std::sync::Arc;

use crate::dialogue::DialogueService;
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::extraction::{MemoryExtraction, MemoryExtractor};
use crate::knowledge::{
    ContentVariant, KnowledgeObject, KnowledgeStore, ObjectType, VariantKind,
};
use crate::relationships::RelationshipDiscoverer;
use crate::vector::{VectorIndex, VectorRecord};

pub use worker::{spawn_workers, IngestionQueue};

/// Everything needed to ingest one exchange, carried from the request
/// pipeline so retries can be coalesced on `(tenant, session, request)`.
#[derive(Debug, Clone)]
pub struct TurnEnvelope {
    pub tenant_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub request_id: String,
    pub user_message: String,
    pub assistant_message: String,
    /// Context block that accompanied the upstream call, if any
    pub context_text: Option<String>,
    pub metadata: serde_json::Value,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub knowledge_tokens: i64,
}

/// Ids created by one ingestion run
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub user_turn_id: String,
    pub assistant_turn_id: String,
    pub memory_ids: Vec<String>,
    pub session_memory_id: Option<String>,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    store: KnowledgeStore,
    dialogue: DialogueService,
    extractor: Arc<MemoryExtractor>,
    discoverer: RelationshipDiscoverer,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IngestionPipeline {
    pub fn new(
        store: KnowledgeStore,
        dialogue: DialogueService,
        extractor: Arc<MemoryExtractor>,
        discoverer: RelationshipDiscoverer,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            dialogue,
            extractor,
            discoverer,
            index,
            embedder,
        }
    }

    /// Full ingestion of one exchange: the durable part, then enrichment.
    pub async fn run(&self, envelope: TurnEnvelope) -> Result<ProcessOutcome> {
        let mut outcome = self.process_turn(&envelope).await?;
        self.enrich(&envelope, &mut outcome).await;
        Ok(outcome)
    }

    /// Durable portion: persist both turns atomically and update the
    /// dialogue state. A failure here is the caller's to handle; nothing
    /// has been committed.
    pub async fn process_turn(&self, envelope: &TurnEnvelope) -> Result<ProcessOutcome> {
        let user_turn = self.turn_object(envelope, "user", &envelope.user_message, envelope.prompt_tokens);
        let assistant_turn = self.turn_object(
            envelope,
            "assistant",
            &envelope.assistant_message,
            envelope.completion_tokens,
        );

        let user_variant =
            ContentVariant::new(&user_turn.id, VariantKind::Raw, &envelope.user_message);
        let assistant_variant = ContentVariant::new(
            &assistant_turn.id,
            VariantKind::Raw,
            &envelope.assistant_message,
        );

        self.store
            .create_turn_pair(
                (&user_turn, &user_variant),
                (&assistant_turn, &assistant_variant),
            )
            .await?;

        let turn_tokens =
            envelope.prompt_tokens + envelope.completion_tokens + envelope.knowledge_tokens;
        if let Err(e) = self
            .dialogue
            .record_turn(
                &envelope.tenant_id,
                &envelope.session_id,
                envelope.user_id.as_deref(),
                &envelope.user_message,
                &envelope.assistant_message,
                turn_tokens,
            )
            .await
        {
            // Turns are already durable; state drift is tolerable
            tracing::warn!(
                tenant_id = %envelope.tenant_id,
                session_id = %envelope.session_id,
                error = %e,
                "dialogue state update failed"
            );
        }

        Ok(ProcessOutcome {
            user_turn_id: user_turn.id,
            assistant_turn_id: assistant_turn.id,
            memory_ids: Vec::new(),
            session_memory_id: None,
        })
    }

    fn turn_object(
        &self,
        envelope: &TurnEnvelope,
        role: &str,
        content: &str,
        tokens: i64,
    ) -> KnowledgeObject {
        let mut object = KnowledgeObject::new(&envelope.tenant_id, ObjectType::Turn);
        object.session_id = Some(envelope.session_id.clone());
        object.user_id = envelope.user_id.clone();
        object.original_tokens = tokens.max(crate::tokens::estimate_tokens(content) as i64);
        let mut metadata = serde_json::json!({
            "role": role,
            "request_id": envelope.request_id,
        });
        if let (Some(dst), Some(src)) = (metadata.as_object_mut(), envelope.metadata.as_object()) {
            for (k, v) in src {
                dst.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        object.metadata = metadata;
        object
    }

    /// Enrichment: embeddings, memory extraction, conditional session
    /// summary, relationship discovery. Each step is independently
    /// persistent; failures are logged and the rest continues.
    pub async fn enrich(&self, envelope: &TurnEnvelope, outcome: &mut ProcessOutcome) {
        futures::future::join(
            self.index_turn(&outcome.user_turn_id, &envelope.tenant_id),
            self.index_turn(&outcome.assistant_turn_id, &envelope.tenant_id),
        )
        .await;

        let extraction = self
            .extractor
            .extract(
                &envelope.user_message,
                &envelope.assistant_message,
                envelope.context_text.as_deref(),
            )
            .await;
        outcome.memory_ids = self.persist_extraction(envelope, &extraction).await;

        outcome.session_memory_id = self.maybe_summarize(envelope).await;

        let mut discovery_targets = vec![
            outcome.user_turn_id.clone(),
            outcome.assistant_turn_id.clone(),
        ];
        discovery_targets.extend(outcome.memory_ids.iter().cloned());
        if let Some(id) = &outcome.session_memory_id {
            discovery_targets.push(id.clone());
        }
        let edges = self
            .discoverer
            .discover_batch(&discovery_targets, &envelope.tenant_id)
            .await;
        tracing::debug!(
            tenant_id = %envelope.tenant_id,
            request_id = %envelope.request_id,
            memories = outcome.memory_ids.len(),
            edges,
            "turn ingestion complete"
        );
    }

    async fn index_turn(&self, object_id: &str, tenant_id: &str) {
        let object = match self.store.get_object(tenant_id, object_id).await {
            Ok(Some(o)) => o,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(tenant_id, object_id, error = %e, "object lookup failed");
                return;
            }
        };
        let variant = match self.store.preferred_variant(object_id).await {
            Ok(Some(v)) => v,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(tenant_id, object_id, error = %e, "variant lookup failed");
                return;
            }
        };
        self.index_variant(object_id, tenant_id, object.object_type, &variant, &object.metadata)
            .await;
    }

    async fn index_variant(
        &self,
        object_id: &str,
        tenant_id: &str,
        object_type: ObjectType,
        variant: &ContentVariant,
        metadata: &serde_json::Value,
    ) {
        let vector = match self.embedder.embed(&variant.content).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(tenant_id, object_id, error = %e, "embedding failed");
                return;
            }
        };
        let record = VectorRecord {
            object_id,
            variant_id: &variant.id,
            tenant_id,
            object_type,
            text: &variant.content,
            vector: &vector,
            metadata,
        };
        if let Err(e) = self.index.store(record).await {
            tracing::warn!(tenant_id, object_id, error = %e, "vector index store failed");
        }
    }

    /// Persist each extracted fact/entity/task as an EXTRACTED_FACT object
    /// with a canonical string variant, and index it.
    async fn persist_extraction(
        &self,
        envelope: &TurnEnvelope,
        extraction: &MemoryExtraction,
    ) -> Vec<String> {
        let method = extraction
            .metadata
            .get("extraction_method")
            .and_then(|v| v.as_str())
            .unwrap_or("llm")
            .to_string();

        let mut memories: Vec<(String, serde_json::Value)> = Vec::new();
        for fact in &extraction.facts {
            memories.push((
                fact.content.clone(),
                serde_json::json!({
                    "kind": "fact",
                    "source": fact.source,
                    "confidence": fact.confidence,
                    "tags": fact.tags,
                }),
            ));
        }
        for entity in &extraction.entities {
            let mut canonical = format!("Entity {}", entity.name);
            if let Some(entity_type) = &entity.entity_type {
                canonical.push_str(&format!(" ({entity_type})"));
            }
            if let Some(description) = &entity.description {
                canonical.push_str(&format!(": {description}"));
            }
            memories.push((
                canonical,
                serde_json::json!({
                    "kind": "entity",
                    "entity_type": entity.entity_type,
                    "confidence": entity.confidence,
                    "attributes": entity.attributes,
                }),
            ));
        }
        for task in &extraction.tasks {
            let mut canonical = format!("Task: {}", task.description);
            if let Some(status) = &task.status {
                canonical.push_str(&format!(" [{status}]"));
            }
            memories.push((
                canonical,
                serde_json::json!({
                    "kind": "task",
                    "status": task.status,
                    "priority": task.priority,
                    "assignee": task.assignee,
                    "due_date": task.due_date,
                }),
            ));
        }

        let mut ids = Vec::with_capacity(memories.len());
        for (canonical, mut metadata) in memories {
            if let Some(map) = metadata.as_object_mut() {
                map.insert(
                    "extraction_method".to_string(),
                    serde_json::Value::String(method.clone()),
                );
                map.insert(
                    "source_request_id".to_string(),
                    serde_json::Value::String(envelope.request_id.clone()),
                );
            }

            let mut object = KnowledgeObject::new(&envelope.tenant_id, ObjectType::ExtractedFact);
            object.session_id = Some(envelope.session_id.clone());
            object.user_id = envelope.user_id.clone();
            object.metadata = metadata;
            let variant = ContentVariant::new(&object.id, VariantKind::Raw, &canonical);
            object.original_tokens = variant.tokens;

            match self.store.create_object_with_variant(&object, &variant).await {
                Ok(()) => {
                    self.index_variant(
                        &object.id,
                        &envelope.tenant_id,
                        ObjectType::ExtractedFact,
                        &variant,
                        &object.metadata,
                    )
                    .await;
                    ids.push(object.id);
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %envelope.tenant_id,
                        request_id = %envelope.request_id,
                        error = %e,
                        "failed to persist extracted memory"
                    );
                }
            }
        }
        ids
    }

    async fn maybe_summarize(&self, envelope: &TurnEnvelope) -> Option<String> {
        let state = match self
            .dialogue
            .get(&envelope.tenant_id, &envelope.session_id)
            .await
        {
            Ok(Some(state)) => state,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %envelope.tenant_id,
                    session_id = %envelope.session_id,
                    error = %e,
                    "dialogue state read failed"
                );
                return None;
            }
        };

        if !self.dialogue.due_for_summary(&state) {
            return None;
        }

        match self
            .dialogue
            .summarize_session(&envelope.tenant_id, &envelope.session_id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(
                    tenant_id = %envelope.tenant_id,
                    session_id = %envelope.session_id,
                    error = %e,
                    "session summarization failed"
                );
                None
            }
        }
    }
}
