//! Context builder properties: sentinel behavior, budget packing, MMR
//! diversification over the wired stores.

mod common;

use common::{harness, tenant, chat_request};
use std::sync::Arc;

use archway::context::{ContextBuilder, ContextOptions};
use archway::tokens::HeuristicTokenizer;
use archway::vector::VectorIndex;

#[tokio::test]
async fn empty_index_yields_sentinel_and_request_proceeds() {
    let h = harness().await;

    let result = h
        .service
        .chat_completion(&tenant("t1"), chat_request("anything at all"))
        .await
        .unwrap();

    // No seeded knowledge: the sentinel means no context block, but the
    // upstream call still happened
    assert!(result.knowledge_context.is_none());
    assert!(!result.choices.is_empty());
    h.stop().await;
}

#[tokio::test]
async fn used_tokens_stay_within_budget() {
    let h = harness().await;
    for i in 0..8 {
        h.seed(
            "t1",
            &format!("fact number {i} about the capital of france and its landmarks"),
        )
        .await;
    }

    let builder = ContextBuilder::new(
        h.index.clone(),
        h.store.clone(),
        Arc::new(HeuristicTokenizer),
        2000,
    );
    let result = builder
        .build(
            "t1",
            None,
            "capital of france landmarks",
            &ContextOptions::default(),
        )
        .await;

    assert!(!result.is_empty());
    assert!(result.used_tokens <= builder.token_budget("t1"));
    h.stop().await;
}

#[tokio::test]
async fn oversized_variants_pack_zero_objects() {
    let h = harness().await;
    let long_fact = format!("capital of france {}", "detail ".repeat(400));
    h.seed("t1", &long_fact).await;

    // Budget of 110: 100 reserved for formatting, leaving 10 tokens, less
    // than any seeded variant alone
    let builder = ContextBuilder::new(
        h.index.clone(),
        h.store.clone(),
        Arc::new(HeuristicTokenizer),
        110,
    );
    let result = builder
        .build("t1", None, "capital of france", &ContextOptions::default())
        .await;

    assert!(result.is_empty());
    assert_eq!(result.used_tokens, 0);
    h.stop().await;
}

#[tokio::test]
async fn zero_budget_yields_sentinel() {
    let h = harness().await;
    h.seed("t1", "capital of france").await;

    let builder = ContextBuilder::new(
        h.index.clone(),
        h.store.clone(),
        Arc::new(HeuristicTokenizer),
        50,
    );
    let result = builder
        .build("t1", None, "capital of france", &ContextOptions::default())
        .await;
    assert!(result.is_empty());
    h.stop().await;
}

#[tokio::test]
async fn high_diversity_prefers_distinct_over_near_duplicate() {
    let h = harness().await;
    let mut duplicates = vec![
        h.seed("t1", "paris is the capital of france and the largest city")
            .await,
    ];
    for _ in 0..4 {
        duplicates.push(
            h.seed("t1", "paris is the capital city of france the largest")
                .await,
        );
    }
    let distinct = h
        .seed("t1", "the eiffel tower attracts millions of visitors in paris")
        .await;

    let builder = ContextBuilder::new(
        h.index.clone(),
        h.store.clone(),
        Arc::new(HeuristicTokenizer),
        2000,
    );
    let options = ContextOptions {
        diversity: 0.9,
        max_context_objects: 2,
        ..ContextOptions::default()
    };
    let result = builder
        .build("t1", None, "paris is the capital of france", &options)
        .await;

    let ids: Vec<&str> = result.used_objects.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(
        ids.contains(&distinct.as_str()),
        "distinct object should beat the near-duplicates"
    );
    let duplicate_hits = ids
        .iter()
        .filter(|id| duplicates.iter().any(|d| d == *id))
        .count();
    assert_eq!(duplicate_hits, 1, "only one of the near-duplicates should pack");
    h.stop().await;
}

#[tokio::test]
async fn matches_carry_object_metadata() {
    let h = harness().await;
    h.seed("t1", "the louvre is a museum in paris").await;

    let matches = h
        .index
        .find_similar(
            "museum in paris",
            5,
            &archway::vector::VectorFilters::tenant("t1"),
            false,
            0.0,
        )
        .await
        .unwrap();

    assert!(!matches.is_empty());
    assert_eq!(matches[0].metadata["source"], "seed");
    h.stop().await;
}

#[tokio::test]
async fn below_threshold_matches_are_dropped() {
    let h = harness().await;
    h.seed("t1", "completely unrelated subject matter entirely").await;

    let builder = ContextBuilder::new(
        h.index.clone(),
        h.store.clone(),
        Arc::new(HeuristicTokenizer),
        2000,
    );
    let options = ContextOptions {
        similarity_threshold: 0.95,
        ..ContextOptions::default()
    };
    let result = builder
        .build("t1", None, "capital of france", &options)
        .await;
    assert!(result.is_empty());
    h.stop().await;
}
