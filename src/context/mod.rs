//! Context builder
//!
//! Retrieves semantically relevant knowledge for a tenant, diversifies the
//! selection with MMR, and packs it into a bounded token budget. A failure
//! anywhere in retrieval degrades to the empty-context sentinel; the
//! enclosing request always proceeds.

pub mod mmr;

use std::collections::HashMap;
use std::sync::Arc;

use crate::knowledge::{KnowledgeStore, ObjectType};
use crate::tokens::Tokenizer;
use crate::vector::{VectorFilters, VectorIndex};

/// Tokens held back from the budget for the header and per-entry framing
const FORMAT_RESERVE: usize = 100;

/// Characters of content carried into the packed block per object
const SNIPPET_CHAR_LIMIT: usize = 600;

/// Knowledge retrieval options, settable per request
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// 0 = pure relevance, 1 = maximum diversity (MMR λ = 1 − diversity)
    pub diversity: f64,
    /// Vector index fetch size
    pub max_results: usize,
    /// Ceiling on objects packed into the context block
    pub max_context_objects: usize,
    /// Candidates below this similarity are dropped
    pub similarity_threshold: f64,
    /// Also surface the most recent turns of the session
    pub include_recent: bool,
    /// Expand candidates through stored relationships
    pub include_related: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            diversity: 0.3,
            max_results: 20,
            max_context_objects: 10,
            similarity_threshold: 0.5,
            include_recent: false,
            include_related: false,
        }
    }
}

/// One object that made it into the packed context
#[derive(Debug, Clone, serde::Serialize)]
pub struct UsedObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub title: String,
    pub relevance: f64,
}

/// Result of one build. `context_text == None` is the empty-context
/// sentinel: no usable knowledge was found (or retrieval failed) and the
/// upstream call proceeds without a context block.
#[derive(Debug, Clone, Default)]
pub struct ContextResult {
    pub context_text: Option<String>,
    pub used_objects: Vec<UsedObject>,
    pub used_tokens: usize,
}

impl ContextResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.context_text.is_none()
    }
}

struct Candidate {
    object_id: String,
    object_type: ObjectType,
    created_at: chrono::DateTime<chrono::Utc>,
    score: f64,
    content: String,
}

#[derive(Clone)]
pub struct ContextBuilder {
    index: Arc<dyn VectorIndex>,
    store: KnowledgeStore,
    tokenizer: Arc<dyn Tokenizer>,
    token_budget: usize,
}

impl ContextBuilder {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        store: KnowledgeStore,
        tokenizer: Arc<dyn Tokenizer>,
        token_budget: usize,
    ) -> Self {
        Self {
            index,
            store,
            tokenizer,
            token_budget,
        }
    }

    /// Per-tenant context token budget. Currently the deployment-wide
    /// default; kept as a method so per-tenant overrides slot in here.
    pub fn token_budget(&self, _tenant_id: &str) -> usize {
        self.token_budget
    }

    /// Build the knowledge context for one prompt.
    ///
    /// Never fails: retrieval or embedding errors return the sentinel.
    pub async fn build(
        &self,
        tenant_id: &str,
        session_id: Option<&str>,
        prompt: &str,
        options: &ContextOptions,
    ) -> ContextResult {
        let candidates = match self
            .gather_candidates(tenant_id, session_id, prompt, options)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "context retrieval failed, proceeding without context");
                return ContextResult::empty();
            }
        };

        if candidates.is_empty() {
            return ContextResult::empty();
        }

        self.pack(tenant_id, candidates, options)
    }

    async fn gather_candidates(
        &self,
        tenant_id: &str,
        session_id: Option<&str>,
        prompt: &str,
        options: &ContextOptions,
    ) -> crate::error::Result<Vec<Candidate>> {
        let filters = VectorFilters::tenant(tenant_id);
        let matches = self
            .index
            .find_similar(prompt, options.max_results, &filters, false, 0.0)
            .await?;

        // Best-scoring variant wins per object
        let mut best: HashMap<String, f64> = HashMap::new();
        for m in matches {
            if m.score < options.similarity_threshold {
                continue;
            }
            let entry = best.entry(m.object_id).or_insert(m.score);
            if m.score > *entry {
                *entry = m.score;
            }
        }

        if options.include_related {
            let mut top: Vec<(String, f64)> =
                best.iter().map(|(id, s)| (id.clone(), *s)).collect();
            top.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (object_id, _) in top.into_iter().take(3) {
                let edges = self.store.relationships_for(tenant_id, &object_id).await?;
                for edge in edges {
                    let other = if edge.source_id == object_id {
                        edge.target_id
                    } else {
                        edge.source_id
                    };
                    best.entry(other).or_insert(edge.confidence);
                }
            }
        }

        let ids: Vec<String> = best.keys().cloned().collect();
        // Tenant scoping is already enforced by the store query; the check
        // below is defense-in-depth against index/store drift.
        let mut objects = self.store.get_objects(tenant_id, &ids).await?;
        objects.retain(|o| o.tenant_id == tenant_id && !o.archived);

        if options.include_recent {
            if let Some(session_id) = session_id {
                let recent = self.store.list_session_turns(tenant_id, session_id, 4).await?;
                for (object, _) in recent {
                    best.entry(object.id.clone())
                        .or_insert(options.similarity_threshold);
                    if !objects.iter().any(|o| o.id == object.id) {
                        objects.push(object);
                    }
                }
            }
        }

        let mut candidates = Vec::with_capacity(objects.len());
        for object in objects {
            // SHORT if present, else RAW, else first available
            let Some(variant) = self.store.preferred_variant(&object.id).await? else {
                continue;
            };
            let score = best.get(&object.id).copied().unwrap_or(0.0);
            candidates.push(Candidate {
                object_id: object.id,
                object_type: object.object_type,
                created_at: object.created_at,
                score,
                content: variant.content,
            });
        }

        Ok(candidates)
    }

    fn pack(
        &self,
        tenant_id: &str,
        candidates: Vec<Candidate>,
        options: &ContextOptions,
    ) -> ContextResult {
        let budget = self.token_budget(tenant_id).saturating_sub(FORMAT_RESERVE);
        if budget == 0 {
            return ContextResult::empty();
        }

        let mmr_input: Vec<mmr::MmrCandidate> = candidates
            .iter()
            .map(|c| mmr::MmrCandidate {
                id: c.object_id.clone(),
                relevance: c.score,
                text: c.content.clone(),
                created_at: c.created_at,
            })
            .collect();
        let selection = mmr::select(&mmr_input, options.diversity, options.max_context_objects);

        let mut entries: Vec<String> = Vec::new();
        let mut used_objects: Vec<UsedObject> = Vec::new();
        let mut used_tokens = 0usize;

        for idx in selection {
            let candidate = &candidates[idx];
            let snippet: String = candidate.content.chars().take(SNIPPET_CHAR_LIMIT).collect();
            let tokens = self.tokenizer.count(&snippet);
            if used_tokens + tokens > budget {
                // First overflow ends packing; MMR order is priority order
                break;
            }
            used_tokens += tokens;
            entries.push(format!(
                "• {} [src:{}, type:{}]",
                snippet.trim(),
                candidate.object_id,
                candidate.object_type
            ));
            used_objects.push(UsedObject {
                id: candidate.object_id.clone(),
                object_type: candidate.object_type,
                title: candidate.content.chars().take(60).collect::<String>().trim().to_string(),
                relevance: candidate.score,
            });
        }

        if entries.is_empty() {
            return ContextResult::empty();
        }

        let context_text = format!(
            "Relevant knowledge from memory:\n\n{}",
            entries.join("\n\n")
        );

        ContextResult {
            context_text: Some(context_text),
            used_objects,
            used_tokens,
        }
    }
}
