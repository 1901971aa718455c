//! Shared fixtures: mock upstream providers and a fully wired service
//! over an in-memory database and in-memory vector index.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use archway::auth::AuthTenant;
use archway::config::Config;
use archway::context::ContextBuilder;
use archway::dialogue::{DialogueService, SummarizeThresholds};
use archway::embeddings::EmbeddingProvider;
use archway::error::{Error, Result};
use archway::extraction::MemoryExtractor;
use archway::ingestion::{spawn_workers, IngestionPipeline, IngestionQueue};
use archway::knowledge::{ContentVariant, KnowledgeObject, KnowledgeStore, ObjectType, VariantKind};
use archway::llm::{ChatClient, ChatRequest, ChatResponse, TokenUsage};
use archway::pipeline::{ChatCompletionRequest, ChatService, IncomingMessage};
use archway::relationships::{RelationshipDiscoverer, SimilarityBands};
use archway::tokens::HeuristicTokenizer;
use archway::usage::{MemoryCounterStore, RateLimits, UsageEngine};
use archway::vector::{MemoryVectorIndex, VectorIndex, VectorRecord};

pub const DEFAULT_REPLY: &str = "The capital of France is Paris.";

// =============================================================================
// Mock upstream chat provider
// =============================================================================

#[derive(Clone)]
pub enum MockChatMode {
    Reply(String),
    Fail,
}

pub struct MockChatClient {
    mode: Mutex<MockChatMode>,
}

impl MockChatClient {
    pub fn replying(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(MockChatMode::Reply(reply.into())),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(MockChatMode::Fail),
        })
    }

    pub fn set_mode(&self, mode: MockChatMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            MockChatMode::Reply(content) => Ok(ChatResponse {
                content,
                model: request.model,
                finish_reason: Some("stop".to_string()),
                usage: TokenUsage {
                    prompt_tokens: 20,
                    completion_tokens: 10,
                    total_tokens: 30,
                },
            }),
            MockChatMode::Fail => Err(Error::Upstream("stubbed 500 from provider".to_string())),
        }
    }
}

// =============================================================================
// Mock embedding provider (deterministic bag-of-words hashing)
// =============================================================================

pub const MOCK_EMBED_DIM: usize = 16;

pub struct MockEmbedder {
    fail: Mutex<bool>,
}

impl MockEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: Mutex::new(false),
        })
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; MOCK_EMBED_DIM];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut hash: u64 = 5381;
            for byte in word.bytes() {
                hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
            }
            vector[(hash % MOCK_EMBED_DIM as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if *self.fail.lock().unwrap() {
            return Err(Error::Upstream("stubbed embedding outage".to_string()));
        }
        Ok(Self::embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model(&self) -> &str {
        "mock-embed"
    }

    fn dimension(&self) -> usize {
        MOCK_EMBED_DIM
    }
}

// =============================================================================
// Wired harness
// =============================================================================

pub struct Harness {
    pub pool: sqlx::SqlitePool,
    pub store: KnowledgeStore,
    pub index: Arc<MemoryVectorIndex>,
    pub embedder: Arc<MockEmbedder>,
    pub chat_client: Arc<MockChatClient>,
    pub counters: MemoryCounterStore,
    pub usage: UsageEngine,
    pub dialogue: DialogueService,
    pub discoverer: RelationshipDiscoverer,
    pub queue: Arc<IngestionQueue>,
    pub service: ChatService,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        llm_base_url: "http://localhost:1/v1".to_string(),
        llm_model: "m1".to_string(),
        llm_api_key: None,
        embedding_base_url: "http://localhost:1/v1".to_string(),
        embedding_model: "mock-embed".to_string(),
        embedding_api_key: None,
        embedding_dimension: MOCK_EMBED_DIM,
        rate_limit_min: 100,
        rate_limit_hour: 1000,
        token_budget_default: 2000,
        session_summarize_turn_count: 20,
        session_summarize_token_threshold: 8000,
        request_deadline_secs: 10,
        upstream_timeout_secs: 5,
        ingestion_queue_depth: 64,
        ingestion_workers: 1,
        vector_index: "memory".to_string(),
        blob_storage: "local".to_string(),
        blob_local_base_path: "./data/blobs".to_string(),
    }
}

pub async fn harness() -> Harness {
    harness_with(RateLimits::default(), MockChatClient::replying(DEFAULT_REPLY)).await
}

pub async fn harness_with(limits: RateLimits, chat_client: Arc<MockChatClient>) -> Harness {
    let config = Arc::new(test_config());
    let pool = archway::database::connect_in_memory().await.unwrap();

    let embedder = MockEmbedder::new();
    let embedder_dyn: Arc<dyn EmbeddingProvider> = embedder.clone();
    let index = Arc::new(MemoryVectorIndex::new(embedder_dyn.clone()));
    let index_dyn: Arc<dyn VectorIndex> = index.clone();

    let store = KnowledgeStore::new(pool.clone());
    let counters = MemoryCounterStore::new();
    let usage = UsageEngine::new(pool.clone(), Arc::new(counters.clone()), limits);

    let chat_dyn: Arc<dyn ChatClient> = chat_client.clone();
    let context = ContextBuilder::new(
        index_dyn.clone(),
        store.clone(),
        Arc::new(HeuristicTokenizer),
        config.token_budget_default,
    );
    let dialogue = DialogueService::new(
        pool.clone(),
        store.clone(),
        chat_dyn.clone(),
        config.llm_model.clone(),
        SummarizeThresholds {
            turn_count: config.session_summarize_turn_count,
            token_threshold: config.session_summarize_token_threshold,
        },
    );
    let extractor = Arc::new(MemoryExtractor::new(chat_dyn.clone(), config.llm_model.clone()));
    let discoverer =
        RelationshipDiscoverer::new(store.clone(), index_dyn.clone(), SimilarityBands::default());

    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        dialogue.clone(),
        extractor,
        discoverer.clone(),
        index_dyn.clone(),
        embedder_dyn.clone(),
    ));
    let queue = IngestionQueue::new(config.ingestion_queue_depth);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let workers = spawn_workers(queue.clone(), pipeline, config.ingestion_workers, shutdown_rx);

    let service = ChatService::new(
        config,
        usage.clone(),
        context,
        chat_dyn,
        embedder_dyn,
        queue.clone(),
    );

    Harness {
        pool,
        store,
        index,
        embedder,
        chat_client,
        counters,
        usage,
        dialogue,
        discoverer,
        queue,
        service,
        shutdown,
        workers,
    }
}

impl Harness {
    /// Seed one knowledge object with a SHORT variant and index it.
    pub async fn seed(&self, tenant_id: &str, content: &str) -> String {
        let mut object = KnowledgeObject::new(tenant_id, ObjectType::ExtractedFact);
        object.metadata = serde_json::json!({ "source": "seed" });
        let variant = ContentVariant::new(&object.id, VariantKind::Short, content);
        self.store
            .create_object_with_variant(&object, &variant)
            .await
            .unwrap();

        let vector = self.embedder.embed(content).await.unwrap();
        self.index
            .store(VectorRecord {
                object_id: &object.id,
                variant_id: &variant.id,
                tenant_id,
                object_type: object.object_type,
                text: content,
                vector: &vector,
                metadata: &object.metadata,
            })
            .await
            .unwrap();
        object.id
    }

    /// Wait for enqueued ingestion work to finish.
    pub async fn drain(&self) {
        self.queue.drain().await;
    }

    pub async fn stop(self) {
        self.queue.drain().await;
        let _ = self.shutdown.send(true);
        for handle in self.workers {
            let _ = handle.await;
        }
    }
}

pub fn tenant(id: &str) -> AuthTenant {
    AuthTenant {
        tenant_id: id.to_string(),
        key_id: format!("key-{id}"),
    }
}

pub fn chat_request(text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: Some("m1".to_string()),
        messages: vec![IncomingMessage {
            role: "user".to_string(),
            content: text.to_string(),
        }],
        temperature: None,
        max_tokens: None,
        stream: None,
        user: None,
        session_id: Some("s1".to_string()),
        knowledge_context: None,
    }
}
