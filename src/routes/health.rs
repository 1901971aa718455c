//! Health and readiness probes

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

use super::AppState;

/// GET /health, process liveness
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ready, database and blob storage reachability
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = crate::database::health_check(&state.pool).await;
    let storage = state.storage.health_check().await;

    match (&database, &storage) {
        (Ok(()), Ok(())) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready" })),
        ),
        _ => {
            if let Err(e) = &database {
                tracing::warn!(error = %e, "database readiness check failed");
            }
            if let Err(e) = &storage {
                tracing::warn!(error = %e, "storage readiness check failed");
            }
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unavailable",
                    "database": database.is_ok(),
                    "storage": storage.is_ok(),
                })),
            )
        }
    }
}
