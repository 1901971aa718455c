//! Configuration for Archway
//!
//! All secrets are injected via environment variables at runtime.
//! The source code contains no secrets.

use anyhow::{Context, Result};

#[derive(Clone)]
pub struct Config {
    /// Port to listen on (default: 8090)
    pub port: u16,

    /// SQLite database URL (default: sqlite://archway.db?mode=rwc)
    pub database_url: String,

    // =========================================================================
    // Upstream providers (OpenAI-compatible)
    // =========================================================================
    /// Base URL of the upstream chat-completions provider
    pub llm_base_url: String,

    /// Default chat model when the client does not pin one
    pub llm_model: String,

    /// API key for the upstream chat provider
    pub llm_api_key: Option<String>,

    /// Base URL of the embedding provider (defaults to the LLM base URL)
    pub embedding_base_url: String,

    /// Embedding model name
    pub embedding_model: String,

    /// API key for the embedding provider (defaults to the LLM key)
    pub embedding_api_key: Option<String>,

    /// Embedding dimension; must match the vector index schema
    pub embedding_dimension: usize,

    // =========================================================================
    // Admission and budgets
    // =========================================================================
    /// Requests allowed per tenant per minute window
    pub rate_limit_min: u64,

    /// Requests allowed per tenant per hour window
    pub rate_limit_hour: u64,

    /// Default per-tenant context token budget
    pub token_budget_default: usize,

    // =========================================================================
    // Session summarization
    // =========================================================================
    /// Summarize a session after this many turns since the last summary
    pub session_summarize_turn_count: i64,

    /// Summarize a session after this many tokens since the last summary
    pub session_summarize_token_threshold: i64,

    // =========================================================================
    // Timeouts and ingestion
    // =========================================================================
    /// Hard deadline for one request end-to-end, seconds (default: 60)
    pub request_deadline_secs: u64,

    /// Per-call timeout for upstream LLM/embedding requests, seconds
    pub upstream_timeout_secs: u64,

    /// Bounded depth of the ingestion queue; oldest work is dropped on overflow
    pub ingestion_queue_depth: usize,

    /// Number of ingestion worker tasks
    pub ingestion_workers: usize,

    // =========================================================================
    // Backend selection
    // =========================================================================
    /// Vector index backend: "sqlite" (default) or "memory"
    pub vector_index: String,

    /// Blob storage backend: "local" (default) or "s3"
    pub blob_storage: String,

    /// Base path for the local blob backend
    pub blob_local_base_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let llm_base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
        let llm_api_key = std::env::var("LLM_API_KEY").ok();

        Ok(Self {
            port: std::env::var("ARCHWAY_PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse()
                .context("Invalid ARCHWAY_PORT")?,

            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://archway.db?mode=rwc".to_string()),

            embedding_base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| llm_base_url.clone()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY")
                .ok()
                .or_else(|| llm_api_key.clone()),
            embedding_dimension: std::env::var("EMBEDDING_DIMENSION")
                .unwrap_or_else(|_| "768".to_string())
                .parse()
                .context("Invalid EMBEDDING_DIMENSION")?,

            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_base_url,
            llm_api_key,

            rate_limit_min: std::env::var("RATE_LIMIT_MIN")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_MIN")?,
            rate_limit_hour: std::env::var("RATE_LIMIT_HOUR")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_HOUR")?,

            token_budget_default: std::env::var("TOKEN_BUDGET_DEFAULT")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .context("Invalid TOKEN_BUDGET_DEFAULT")?,

            session_summarize_turn_count: std::env::var("SESSION_SUMMARIZE_TURN_COUNT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid SESSION_SUMMARIZE_TURN_COUNT")?,
            session_summarize_token_threshold: std::env::var("SESSION_SUMMARIZE_TOKEN_THRESHOLD")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("Invalid SESSION_SUMMARIZE_TOKEN_THRESHOLD")?,

            request_deadline_secs: std::env::var("REQUEST_DEADLINE_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid REQUEST_DEADLINE_SECS")?,
            upstream_timeout_secs: std::env::var("UPSTREAM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "45".to_string())
                .parse()
                .context("Invalid UPSTREAM_TIMEOUT_SECS")?,

            ingestion_queue_depth: std::env::var("INGESTION_QUEUE_DEPTH")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .context("Invalid INGESTION_QUEUE_DEPTH")?,
            ingestion_workers: std::env::var("INGESTION_WORKERS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("Invalid INGESTION_WORKERS")?,

            vector_index: std::env::var("VECTOR_INDEX").unwrap_or_else(|_| "sqlite".to_string()),

            blob_storage: std::env::var("BLOB_STORAGE").unwrap_or_else(|_| "local".to_string()),
            blob_local_base_path: std::env::var("BLOB_STORAGE_LOCAL_BASE_PATH")
                .unwrap_or_else(|_| "./data/blobs".to_string()),
        })
    }

    /// Check if an upstream chat provider is configured with credentials
    pub fn has_llm_credentials(&self) -> bool {
        self.llm_api_key.is_some()
    }

    /// Check if S3 blob storage is selected
    pub fn uses_s3_storage(&self) -> bool {
        self.blob_storage.eq_ignore_ascii_case("s3")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        // Clear the variables this test depends on so ambient env doesn't leak in
        for key in ["RATE_LIMIT_MIN", "RATE_LIMIT_HOUR", "TOKEN_BUDGET_DEFAULT"] {
            std::env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.rate_limit_min, 100);
        assert_eq!(config.rate_limit_hour, 1000);
        assert_eq!(config.token_budget_default, 2000);
    }
}
