//! OpenAI-compatible chat, embeddings, and models routes

use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use super::AppState;
use crate::auth::AuthTenant;
use crate::error::Error;
use crate::models::MODELS;
use crate::pipeline::{
    ChatCompletionRequest, ChatCompletionResponse, EmbeddingsRequest, EmbeddingsResponse,
};

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    tenant: AuthTenant,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>, Error> {
    let response = state.chat.chat_completion(&tenant, request).await?;
    Ok(Json(response))
}

/// POST /v1/embeddings
pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    tenant: AuthTenant,
    Json(request): Json<EmbeddingsRequest>,
) -> Result<Json<EmbeddingsResponse>, Error> {
    let response = state.chat.embeddings(&tenant, request).await?;
    Ok(Json(response))
}

/// GET /v1/models
pub async fn list_models(State(_state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = MODELS
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "object": "model",
                "owned_by": m.owned_by,
                "maxTokens": m.max_tokens,
                "knowledgeAware": m.knowledge_aware,
            })
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": models,
    }))
}
