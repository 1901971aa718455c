//! Admission boundaries and usage accounting.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use archway::error::{Error, Result};
use archway::usage::{
    CompletionRecord, CounterStore, MemoryCounterStore, RateLimits, UsageEngine,
};

struct DownCounterStore;

#[async_trait]
impl CounterStore for DownCounterStore {
    async fn increment(&self, _key: &str, _by: f64, _ttl: Duration) -> Result<f64> {
        Err(Error::Other("counter store unreachable".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<f64> {
        Err(Error::Other("counter store unreachable".to_string()))
    }
}

fn record<'a>(tenant: &'a str, request_id: &'a str) -> CompletionRecord<'a> {
    CompletionRecord {
        tenant_id: tenant,
        user_id: None,
        session_id: Some("s1"),
        request_id,
        model: "gpt-4o-mini",
        prompt_tokens: 100,
        completion_tokens: 50,
        knowledge_tokens: 25,
    }
}

#[tokio::test]
async fn admission_denies_exactly_at_ceiling() {
    let pool = archway::database::connect_in_memory().await.unwrap();
    let engine = UsageEngine::new(
        pool,
        Arc::new(MemoryCounterStore::new()),
        RateLimits {
            per_minute: 2,
            per_hour: 1000,
        },
    );

    assert!(engine.admit("t1").await.is_allowed());
    engine.record_chat_completion(record("t1", "r1")).await;
    assert!(engine.admit("t1").await.is_allowed());
    engine.record_chat_completion(record("t1", "r2")).await;

    // Count now equals the minute ceiling
    assert!(!engine.admit("t1").await.is_allowed());
}

#[tokio::test]
async fn admission_is_idempotent_without_records() {
    let pool = archway::database::connect_in_memory().await.unwrap();
    let engine = UsageEngine::new(
        pool,
        Arc::new(MemoryCounterStore::new()),
        RateLimits {
            per_minute: 1,
            per_hour: 1000,
        },
    );

    for _ in 0..10 {
        assert!(engine.admit("t1").await.is_allowed());
    }
    let usage = engine.current_usage("t1").await;
    assert_eq!(usage.req_per_min as u64, 0);
}

#[tokio::test]
async fn admission_fails_open_when_counters_are_down() {
    let pool = archway::database::connect_in_memory().await.unwrap();
    let engine = UsageEngine::new(
        pool,
        Arc::new(DownCounterStore),
        RateLimits {
            per_minute: 1,
            per_hour: 1,
        },
    );

    // Every request is admitted, and recording drops metrics without erroring
    assert!(engine.admit("t1").await.is_allowed());
    engine.record_chat_completion(record("t1", "r1")).await;
    assert!(engine.admit("t1").await.is_allowed());
}

#[tokio::test]
async fn tenants_have_independent_windows() {
    let pool = archway::database::connect_in_memory().await.unwrap();
    let engine = UsageEngine::new(
        pool,
        Arc::new(MemoryCounterStore::new()),
        RateLimits {
            per_minute: 1,
            per_hour: 1000,
        },
    );

    engine.record_chat_completion(record("t1", "r1")).await;
    assert!(!engine.admit("t1").await.is_allowed());
    assert!(engine.admit("t2").await.is_allowed());
}

#[tokio::test]
async fn current_usage_tracks_all_metrics() {
    let pool = archway::database::connect_in_memory().await.unwrap();
    let engine = UsageEngine::new(
        pool,
        Arc::new(MemoryCounterStore::new()),
        RateLimits::default(),
    );

    engine.record_chat_completion(record("t1", "r1")).await;
    engine.record_chat_completion(record("t1", "r2")).await;

    let usage = engine.current_usage("t1").await;
    assert_eq!(usage.req_per_min as u64, 2);
    assert_eq!(usage.tok_per_min as u64, 350);
    assert!(usage.cost_per_min > 0.0);
    assert_eq!(usage.req_per_hour as u64, 2);
}

#[tokio::test]
async fn stats_aggregate_by_model() {
    let pool = archway::database::connect_in_memory().await.unwrap();
    let engine = UsageEngine::new(
        pool,
        Arc::new(MemoryCounterStore::new()),
        RateLimits::default(),
    );

    engine.record_chat_completion(record("t1", "r1")).await;
    let mut other = record("t1", "r2");
    other.model = "gpt-4o";
    engine.record_chat_completion(other).await;
    // Another tenant's rows must not appear
    engine.record_chat_completion(record("t2", "r3")).await;

    let from = chrono::Utc::now() - chrono::Duration::hours(1);
    let to = chrono::Utc::now() + chrono::Duration::hours(1);
    let stats = engine.stats("t1", from, to).await.unwrap();

    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.total_tokens, 350);
    assert_eq!(stats.by_model.len(), 2);
    assert_eq!(stats.by_model["gpt-4o-mini"].requests, 1);
    assert_eq!(stats.by_model["gpt-4o"].requests, 1);
    assert!(stats.total_cost > 0.0);
}

#[tokio::test]
async fn negative_token_counts_clamp_to_zero() {
    let pool = archway::database::connect_in_memory().await.unwrap();
    let engine = UsageEngine::new(
        pool,
        Arc::new(MemoryCounterStore::new()),
        RateLimits::default(),
    );

    let mut bad = record("t1", "r1");
    bad.prompt_tokens = -50;
    bad.completion_tokens = -10;
    bad.knowledge_tokens = -5;
    let cost = engine.record_chat_completion(bad).await;
    assert_eq!(cost, 0.0);

    let usage = engine.current_usage("t1").await;
    assert_eq!(usage.tok_per_min as u64, 0);
    assert_eq!(usage.req_per_min as u64, 1);
}
