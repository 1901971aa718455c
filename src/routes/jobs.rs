//! Operational job endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::AppState;
use crate::error::Error;
use crate::scheduler::run_summarize_sweep;

#[derive(Debug, Deserialize)]
pub struct SummarizeParams {
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_batch_size() -> i64 {
    10
}

/// POST /jobs/session-summarize?batch_size=N
///
/// Summarizes up to `batch_size` sessions currently over a threshold.
pub async fn session_summarize(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SummarizeParams>,
) -> Result<Json<serde_json::Value>, Error> {
    let batch = params.batch_size.clamp(1, 100);
    let summarized = run_summarize_sweep(&state.dialogue, batch).await?;
    Ok(Json(serde_json::json!({ "summarized": summarized })))
}

/// GET /jobs/health, scheduler liveness and ingestion backlog
pub async fn jobs_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.scheduler.is_running() { "ok" } else { "stopped" },
        "scheduler_running": state.scheduler.is_running(),
        "pending_ingestion": state.queue.pending(),
        "dropped_ingestion": state.queue.dropped(),
    }))
}
