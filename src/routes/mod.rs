//! HTTP surface
//!
//! OpenAI-compatible endpoints under `/v1`, operational jobs under `/jobs`,
//! and unauthenticated health probes.

pub mod chat;
pub mod health;
pub mod jobs;

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::ApiKeyStore;
use crate::blob::Storage;
use crate::config::Config;
use crate::dialogue::DialogueService;
use crate::ingestion::IngestionQueue;
use crate::pipeline::ChatService;
use crate::scheduler::SchedulerStatus;
use crate::usage::UsageEngine;

/// Shared application state
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub keys: ApiKeyStore,
    pub chat: ChatService,
    pub dialogue: DialogueService,
    pub usage: UsageEngine,
    pub queue: Arc<IngestionQueue>,
    pub scheduler: SchedulerStatus,
    pub storage: Storage,
}

impl FromRef<Arc<AppState>> for ApiKeyStore {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.keys.clone()
    }
}

/// Build the full router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health checks (no auth required)
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // OpenAI-compatible surface
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/embeddings", post(chat::embeddings))
        .route("/v1/models", get(chat::list_models))
        // Operational jobs
        .route("/jobs/session-summarize", post(jobs::session_summarize))
        .route("/jobs/health", get(jobs::jobs_health))
        .with_state(state)
}
