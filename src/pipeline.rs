//! Request pipeline
//!
//! One chat completion end to end:
//! auth (extractor) → admit → build context → dispatch upstream → respond,
//! with ingestion and usage recording happening after the response is
//! assembled. Only auth, admission, and dispatch gate the client response;
//! context failures degrade to an empty context and post-response failures
//! are logged and dropped.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::auth::AuthTenant;
use crate::config::Config;
use crate::context::{ContextBuilder, ContextOptions, ContextResult, UsedObject};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::ingestion::{IngestionQueue, TurnEnvelope};
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::tokens::estimate_tokens;
use crate::usage::{Admission, CompletionRecord, UsageEngine};

/// Session used when the client does not supply one
const DEFAULT_SESSION: &str = "default";

// =============================================================================
// Wire types (OpenAI-compatible, superset)
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: Option<bool>,
    /// OpenAI `user` field, carried through as the acting user id
    #[serde(default)]
    pub user: Option<String>,
    /// Session binding for dialogue state; defaults to a shared session
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "knowledgeContext", default)]
    pub knowledge_context: Option<KnowledgeContextOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

/// Per-request knowledge retrieval overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnowledgeContextOptions {
    #[serde(rename = "includeRecent")]
    pub include_recent: Option<bool>,
    #[serde(rename = "includeRelated")]
    pub include_related: Option<bool>,
    #[serde(rename = "maxContextObjects")]
    pub max_context_objects: Option<usize>,
    #[serde(rename = "similarityThreshold")]
    pub similarity_threshold: Option<f64>,
    pub diversity: Option<f64>,
}

impl KnowledgeContextOptions {
    fn to_context_options(&self) -> ContextOptions {
        let defaults = ContextOptions::default();
        ContextOptions {
            diversity: self.diversity.unwrap_or(defaults.diversity),
            max_results: defaults.max_results,
            max_context_objects: self
                .max_context_objects
                .unwrap_or(defaults.max_context_objects),
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            include_recent: self.include_recent.unwrap_or(defaults.include_recent),
            include_related: self.include_related.unwrap_or(defaults.include_related),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: UsageBlock,
    #[serde(rename = "knowledgeContext", skip_serializing_if = "Option::is_none")]
    pub knowledge_context: Option<KnowledgeContextInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: OutgoingMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageBlock {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeContextInfo {
    #[serde(rename = "objectsUsed")]
    pub objects_used: Vec<UsedObject>,
    #[serde(rename = "totalObjects")]
    pub total_objects: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub input: EmbeddingsInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingsInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingsInput {
    fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingsInput::Single(s) => vec![s],
            EmbeddingsInput::Batch(v) => v,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingsResponse {
    pub object: &'static str,
    pub data: Vec<EmbeddingDatum>,
    pub model: String,
    pub usage: UsageBlock,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingDatum {
    pub index: usize,
    pub object: &'static str,
    pub embedding: Vec<f32>,
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
pub struct ChatService {
    config: Arc<Config>,
    usage: UsageEngine,
    context: ContextBuilder,
    chat: Arc<dyn ChatClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    queue: Arc<IngestionQueue>,
}

impl ChatService {
    pub fn new(
        config: Arc<Config>,
        usage: UsageEngine,
        context: ContextBuilder,
        chat: Arc<dyn ChatClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        queue: Arc<IngestionQueue>,
    ) -> Self {
        Self {
            config,
            usage,
            context,
            chat,
            embedder,
            queue,
        }
    }

    /// Handle one chat completion for an authenticated tenant.
    pub async fn chat_completion(
        &self,
        tenant: &AuthTenant,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.request_deadline_secs);

        // 1. Validate
        if request.messages.is_empty() {
            return Err(Error::BadRequest("messages must not be empty".into()));
        }
        if request.stream == Some(true) {
            return Err(Error::BadRequest(
                "streaming responses are not supported".into(),
            ));
        }
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .ok_or_else(|| Error::BadRequest("no user message present".into()))?;

        // 2. Admission (reads counters, never writes)
        match self.usage.admit(&tenant.tenant_id).await {
            Admission::Allow => {}
            Admission::Deny {
                reason,
                retry_after_secs,
            } => {
                tracing::info!(
                    tenant_id = %tenant.tenant_id,
                    reason = %reason,
                    "request rejected by rate limiter"
                );
                return Err(Error::RateLimited {
                    reason,
                    retry_after_secs,
                });
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| DEFAULT_SESSION.to_string());
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.llm_model.clone());
        let options = request
            .knowledge_context
            .as_ref()
            .map(KnowledgeContextOptions::to_context_options)
            .unwrap_or_default();

        // 3. Build context; a failed or cancelled build degrades to the
        //    empty-context sentinel and the upstream call still proceeds
        let remaining = deadline.saturating_sub(started.elapsed());
        let context = match tokio::time::timeout(
            remaining,
            self.context
                .build(&tenant.tenant_id, Some(&session_id), &prompt, &options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    tenant_id = %tenant.tenant_id,
                    request_id = %request_id,
                    "context build timed out, proceeding without context"
                );
                ContextResult::empty()
            }
        };

        // 4. Dispatch upstream with the context block injected
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(context_text) = &context.context_text {
            messages.push(ChatMessage::system(context_text.clone()));
        }
        messages.extend(
            request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                }),
        );

        let upstream_request = ChatRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            self.record_admitted_failure(tenant, &request, &session_id, &request_id, &model)
                .await;
            return Err(Error::Timeout);
        }
        let upstream = match tokio::time::timeout(remaining, self.chat.complete(upstream_request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(
                    tenant_id = %tenant.tenant_id,
                    request_id = %request_id,
                    error = %e,
                    "upstream dispatch failed"
                );
                self.record_admitted_failure(tenant, &request, &session_id, &request_id, &model)
                    .await;
                return Err(e);
            }
            Err(_) => {
                self.record_admitted_failure(tenant, &request, &session_id, &request_id, &model)
                    .await;
                return Err(Error::Timeout);
            }
        };

        // 5. Assemble the client response
        let knowledge_tokens = context.used_tokens as i64;
        let response = ChatCompletionResponse {
            id: format!("chatcmpl-{request_id}"),
            object: "chat.completion",
            created: Utc::now().timestamp(),
            model: upstream.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: OutgoingMessage {
                    role: "assistant".to_string(),
                    content: upstream.content.clone(),
                },
                finish_reason: upstream
                    .finish_reason
                    .clone()
                    .unwrap_or_else(|| "stop".to_string()),
            }],
            usage: UsageBlock {
                prompt_tokens: upstream.usage.prompt_tokens,
                completion_tokens: upstream.usage.completion_tokens,
                total_tokens: upstream.usage.total_tokens,
            },
            knowledge_context: if context.used_objects.is_empty() {
                None
            } else {
                Some(KnowledgeContextInfo {
                    total_objects: context.used_objects.len(),
                    objects_used: context.used_objects.clone(),
                })
            },
        };

        // 6. Post-response bookkeeping: both are non-fatal from here on
        self.usage
            .record_chat_completion(CompletionRecord {
                tenant_id: &tenant.tenant_id,
                user_id: request.user.as_deref(),
                session_id: Some(&session_id),
                request_id: &request_id,
                model: &model,
                prompt_tokens: upstream.usage.prompt_tokens,
                completion_tokens: upstream.usage.completion_tokens,
                knowledge_tokens,
            })
            .await;

        self.queue.enqueue(TurnEnvelope {
            tenant_id: tenant.tenant_id.clone(),
            session_id,
            user_id: request.user.clone(),
            request_id,
            user_message: prompt,
            assistant_message: upstream.content,
            context_text: context.context_text.clone(),
            metadata: serde_json::json!({ "model": model }),
            prompt_tokens: upstream.usage.prompt_tokens,
            completion_tokens: upstream.usage.completion_tokens,
            knowledge_tokens,
        });

        Ok(response)
    }

    /// The request was admitted, so it counts against the window even when
    /// the upstream dispatch fails.
    async fn record_admitted_failure(
        &self,
        tenant: &AuthTenant,
        request: &ChatCompletionRequest,
        session_id: &str,
        request_id: &str,
        model: &str,
    ) {
        self.usage
            .record_chat_completion(CompletionRecord {
                tenant_id: &tenant.tenant_id,
                user_id: request.user.as_deref(),
                session_id: Some(session_id),
                request_id,
                model,
                prompt_tokens: 0,
                completion_tokens: 0,
                knowledge_tokens: 0,
            })
            .await;
    }

    /// Handle one embeddings request: forward to the embedding provider and
    /// account for the tokens.
    pub async fn embeddings(
        &self,
        tenant: &AuthTenant,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse> {
        match self.usage.admit(&tenant.tenant_id).await {
            Admission::Allow => {}
            Admission::Deny {
                reason,
                retry_after_secs,
            } => {
                return Err(Error::RateLimited {
                    reason,
                    retry_after_secs,
                })
            }
        }

        let inputs = request.input.into_vec();
        if inputs.is_empty() {
            return Err(Error::BadRequest("input must not be empty".into()));
        }

        let vectors = self.embedder.embed_batch(&inputs).await.map_err(|e| {
            tracing::warn!(tenant_id = %tenant.tenant_id, error = %e, "embedding dispatch failed");
            e
        })?;

        let tokens: i64 = inputs.iter().map(|s| estimate_tokens(s) as i64).sum();
        let model = self.embedder.model().to_string();
        let request_id = Uuid::new_v4().to_string();
        self.usage
            .record_embedding(&tenant.tenant_id, None, None, &request_id, &model, tokens)
            .await;

        Ok(EmbeddingsResponse {
            object: "list",
            data: vectors
                .into_iter()
                .enumerate()
                .map(|(index, embedding)| EmbeddingDatum {
                    index,
                    object: "embedding",
                    embedding,
                })
                .collect(),
            model,
            usage: UsageBlock {
                prompt_tokens: tokens,
                completion_tokens: 0,
                total_tokens: tokens,
            },
        })
    }
}
