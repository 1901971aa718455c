//! Archway server
//!
//! Knowledge-aware middleware fronting an OpenAI-compatible chat API.
//! Wires the component graph from environment configuration, starts the
//! ingestion workers and maintenance scheduler, and serves the HTTP
//! surface until shutdown. In-flight ingestion is drained before exit.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archway::auth::ApiKeyStore;
use archway::blob::{S3Config, Storage};
use archway::config::Config;
use archway::context::ContextBuilder;
use archway::database;
use archway::dialogue::{DialogueService, SummarizeThresholds};
use archway::embeddings::{EmbeddingProvider, HttpEmbeddingClient};
use archway::extraction::MemoryExtractor;
use archway::ingestion::{spawn_workers, IngestionPipeline, IngestionQueue};
use archway::knowledge::KnowledgeStore;
use archway::llm::{ChatClient, HttpChatClient};
use archway::pipeline::ChatService;
use archway::relationships::{RelationshipDiscoverer, SimilarityBands};
use archway::routes::{self, AppState};
use archway::scheduler::Scheduler;
use archway::tokens::HeuristicTokenizer;
use archway::usage::{MemoryCounterStore, RateLimits, UsageEngine};
use archway::vector::{MemoryVectorIndex, SqliteVectorIndex, VectorIndex};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archway=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing::info!(
        "Starting Archway on port {} (llm={}, embeddings={} dim={})",
        config.port,
        config.llm_model,
        config.embedding_model,
        config.embedding_dimension
    );
    if !config.has_llm_credentials() {
        tracing::warn!("LLM_API_KEY not set; upstream calls will be unauthenticated");
    }

    // Database
    let pool = database::connect(&config.database_url).await?;
    database::ensure_vec_table(&pool, config.embedding_dimension).await?;

    // Upstream providers
    let upstream_timeout = Duration::from_secs(config.upstream_timeout_secs);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingClient::new(
        &config.embedding_base_url,
        config.embedding_api_key.clone(),
        &config.embedding_model,
        config.embedding_dimension,
        upstream_timeout,
    )?);
    let chat_client: Arc<dyn ChatClient> = Arc::new(HttpChatClient::new(
        &config.llm_base_url,
        config.llm_api_key.clone(),
        upstream_timeout,
    )?);

    // Stores and engines
    let store = KnowledgeStore::new(pool.clone());
    let index: Arc<dyn VectorIndex> = match config.vector_index.as_str() {
        "memory" => Arc::new(MemoryVectorIndex::new(embedder.clone())),
        _ => Arc::new(SqliteVectorIndex::new(pool.clone(), embedder.clone())),
    };
    let counters = MemoryCounterStore::new();
    let usage = UsageEngine::new(
        pool.clone(),
        Arc::new(counters.clone()),
        RateLimits {
            per_minute: config.rate_limit_min,
            per_hour: config.rate_limit_hour,
        },
    );
    let context = ContextBuilder::new(
        index.clone(),
        store.clone(),
        Arc::new(HeuristicTokenizer),
        config.token_budget_default,
    );
    let dialogue = DialogueService::new(
        pool.clone(),
        store.clone(),
        chat_client.clone(),
        config.llm_model.clone(),
        SummarizeThresholds {
            turn_count: config.session_summarize_turn_count,
            token_threshold: config.session_summarize_token_threshold,
        },
    );
    let extractor = Arc::new(MemoryExtractor::new(
        chat_client.clone(),
        config.llm_model.clone(),
    ));
    let discoverer =
        RelationshipDiscoverer::new(store.clone(), index.clone(), SimilarityBands::default());

    // Blob storage
    let storage = if config.uses_s3_storage() {
        Storage::s3(S3Config::from_env()?).await?
    } else {
        Storage::local(&config.blob_local_base_path)
    };
    storage.initialize().await?;

    // Ingestion worker pool
    let ingestion = Arc::new(IngestionPipeline::new(
        store.clone(),
        dialogue.clone(),
        extractor,
        discoverer.clone(),
        index.clone(),
        embedder.clone(),
    ));
    let queue = IngestionQueue::new(config.ingestion_queue_depth);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = spawn_workers(
        queue.clone(),
        ingestion,
        config.ingestion_workers,
        shutdown_rx,
    );

    // Maintenance scheduler
    let mut scheduler = Scheduler::new(dialogue.clone(), discoverer, counters.clone()).await?;
    scheduler.start().await?;

    // HTTP surface
    let chat_service = ChatService::new(
        config.clone(),
        usage.clone(),
        context,
        chat_client,
        embedder,
        queue.clone(),
    );
    let keys = ApiKeyStore::new(pool.clone());
    let state = Arc::new(AppState {
        config: config.clone(),
        pool,
        keys,
        chat: chat_service,
        dialogue,
        usage,
        queue: queue.clone(),
        scheduler: scheduler.status(),
        storage,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Archway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain in-flight ingestion before exit
    tracing::info!(
        pending = queue.pending(),
        "server stopped, draining ingestion queue"
    );
    queue.drain().await;
    let _ = shutdown_tx.send(true);
    for handle in workers {
        let _ = handle.await;
    }
    scheduler.shutdown().await;
    tracing::info!("Archway shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
