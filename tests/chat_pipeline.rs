//! End-to-end request pipeline scenarios against the wired service.

mod common;

use common::{chat_request, harness, harness_with, tenant, MockChatClient, DEFAULT_REPLY};

use archway::auth::ApiKeyStore;
use archway::error::Error;
use archway::knowledge::ObjectType;
use archway::usage::RateLimits;

#[tokio::test]
async fn happy_path_injects_context_and_persists_turns() {
    let h = harness().await;
    let k1 = h.seed("t1", "Paris is the capital of France").await;

    let response = h
        .service
        .chat_completion(&tenant("t1"), chat_request("What is the capital of France?"))
        .await
        .unwrap();

    assert_eq!(response.object, "chat.completion");
    assert_eq!(response.choices[0].message.content, DEFAULT_REPLY);

    let knowledge = response.knowledge_context.expect("context should be used");
    assert!(knowledge.objects_used.iter().any(|o| o.id == k1));
    assert_eq!(knowledge.total_objects, knowledge.objects_used.len());

    h.drain().await;
    let turns = h.store.count_objects("t1", ObjectType::Turn).await.unwrap();
    assert_eq!(turns, 2);
    h.stop().await;
}

#[tokio::test]
async fn turns_are_durable_before_ingestion_derived_objects() {
    let h = harness().await;

    h.service
        .chat_completion(&tenant("t1"), chat_request("remember that my name is Ada"))
        .await
        .unwrap();
    h.drain().await;

    let turns = h.store.list_objects("t1", ObjectType::Turn, 10).await.unwrap();
    let facts = h
        .store
        .list_objects("t1", ObjectType::ExtractedFact, 10)
        .await
        .unwrap();
    assert_eq!(turns.len(), 2);
    assert!(!facts.is_empty());
    let newest_turn = turns.iter().map(|t| t.created_at).max().unwrap();
    for fact in &facts {
        assert!(fact.created_at >= newest_turn);
    }
    h.stop().await;
}

#[tokio::test]
async fn third_request_in_minute_is_rate_limited() {
    let limits = RateLimits {
        per_minute: 2,
        per_hour: 1000,
    };
    let h = harness_with(limits, MockChatClient::replying(DEFAULT_REPLY)).await;

    for _ in 0..2 {
        h.service
            .chat_completion(&tenant("t1"), chat_request("hello"))
            .await
            .unwrap();
    }

    let third = h
        .service
        .chat_completion(&tenant("t1"), chat_request("hello again"))
        .await;
    match third {
        Err(Error::RateLimited { retry_after_secs, .. }) => {
            assert!(retry_after_secs <= 60);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    h.drain().await;
    // The rejected request created no turns and was not counted
    let turns = h.store.count_objects("t1", ObjectType::Turn).await.unwrap();
    assert_eq!(turns, 4);
    let usage = h.usage.current_usage("t1").await;
    assert_eq!(usage.req_per_min as u64, 2);
    h.stop().await;
}

#[tokio::test]
async fn upstream_failure_returns_bad_gateway_and_persists_nothing() {
    let h = harness_with(RateLimits::default(), MockChatClient::failing()).await;

    let result = h
        .service
        .chat_completion(&tenant("t1"), chat_request("hello"))
        .await;
    assert!(matches!(result, Err(Error::Upstream(_))));

    h.drain().await;
    assert_eq!(h.store.count_objects("t1", ObjectType::Turn).await.unwrap(), 0);
    assert_eq!(
        h.store
            .count_objects("t1", ObjectType::ExtractedFact)
            .await
            .unwrap(),
        0
    );

    // The request was admitted, so it still counts against the window
    let usage = h.usage.current_usage("t1").await;
    assert_eq!(usage.req_per_min as u64, 1);
    h.stop().await;
}

#[tokio::test]
async fn unparsable_extraction_reply_falls_back() {
    let h = harness_with(RateLimits::default(), MockChatClient::replying("not JSON")).await;

    let response = h
        .service
        .chat_completion(&tenant("t1"), chat_request("tell me something"))
        .await
        .unwrap();
    assert_eq!(response.choices[0].message.content, "not JSON");

    h.drain().await;
    let facts = h
        .store
        .list_objects("t1", ObjectType::ExtractedFact, 10)
        .await
        .unwrap();
    assert_eq!(facts.len(), 1);
    let fact = &facts[0];
    assert_eq!(fact.metadata["extraction_method"], "fallback");
    let confidence = fact.metadata["confidence"].as_f64().unwrap();
    assert!(confidence <= 0.3);
    h.stop().await;
}

#[tokio::test]
async fn cross_tenant_knowledge_never_leaks() {
    let h = harness().await;
    let _k1 = h.seed("t1", "Paris is the capital of France").await;
    // The better match belongs to another tenant
    let k2 = h.seed("t2", "What is the capital of France").await;

    let response = h
        .service
        .chat_completion(&tenant("t1"), chat_request("What is the capital of France?"))
        .await
        .unwrap();

    if let Some(knowledge) = response.knowledge_context {
        assert!(knowledge.objects_used.iter().all(|o| o.id != k2));
    }

    h.drain().await;
    assert_eq!(h.store.count_objects("t2", ObjectType::Turn).await.unwrap(), 0);
    h.stop().await;
}

#[tokio::test]
async fn embedding_outage_degrades_to_empty_context() {
    let h = harness().await;
    h.seed("t1", "Paris is the capital of France").await;
    h.embedder.set_failing(true);

    let response = h
        .service
        .chat_completion(&tenant("t1"), chat_request("What is the capital of France?"))
        .await
        .unwrap();

    assert!(response.knowledge_context.is_none());
    assert_eq!(response.choices[0].message.content, DEFAULT_REPLY);
    h.stop().await;
}

#[tokio::test]
async fn streaming_requests_are_rejected() {
    let h = harness().await;
    let mut request = chat_request("hello");
    request.stream = Some(true);

    let result = h.service.chat_completion(&tenant("t1"), request).await;
    assert!(matches!(result, Err(Error::BadRequest(_))));
    h.stop().await;
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let h = harness().await;
    let mut request = chat_request("ignored");
    request.messages.clear();

    let result = h.service.chat_completion(&tenant("t1"), request).await;
    assert!(matches!(result, Err(Error::BadRequest(_))));
    h.stop().await;
}

#[tokio::test]
async fn api_keys_validate_only_active_secrets() {
    let h = harness().await;
    let keys = ApiKeyStore::new(h.pool.clone());

    let (key_id, secret) = keys.create_key("t1", Some("test key")).await.unwrap();

    let bound = keys.validate(&secret).await.unwrap().expect("valid key");
    assert_eq!(bound.tenant_id, "t1");

    assert!(keys.validate("ak_not_a_real_key").await.unwrap().is_none());

    keys.revoke_key(&key_id).await.unwrap();
    assert!(keys.validate(&secret).await.unwrap().is_none());
    h.stop().await;
}

#[tokio::test]
async fn embeddings_endpoint_reports_usage() {
    let h = harness().await;

    let request = archway::pipeline::EmbeddingsRequest {
        model: None,
        input: archway::pipeline::EmbeddingsInput::Batch(vec![
            "first text".to_string(),
            "second text".to_string(),
        ]),
    };
    let response = h.service.embeddings(&tenant("t1"), request).await.unwrap();

    assert_eq!(response.object, "list");
    assert_eq!(response.data.len(), 2);
    assert_eq!(response.data[1].index, 1);
    assert!(response.usage.prompt_tokens > 0);

    let usage = h.usage.current_usage("t1").await;
    assert_eq!(usage.req_per_min as u64, 1);
    h.stop().await;
}
