//! Integration tests for the public façade: read-your-writes, the error
//! taxonomy, explicit merges, warmup, search, and combined metrics.

use super::test_utils::default_engine;
use context_sync::error::EngineError;
use context_sync::manager::MergeStrategy;
use context_sync::types::{ContextId, Payload, SourceSystem};
use serde_json::json;

#[tokio::test]
async fn store_then_get_returns_the_written_payload() {
    let fixture = default_engine();
    let id = ContextId::new("rw");
    let payload = Payload::new(json!({"k": "v", "n": 42}));

    let version = fixture
        .manager
        .store(&id, &payload, SourceSystem::SystemA)
        .await
        .unwrap();
    assert_eq!(version, 1);
    assert_eq!(fixture.manager.get(&id).await.unwrap(), payload);
}

#[tokio::test]
async fn read_your_writes_under_concurrent_unrelated_stores() {
    let fixture = default_engine();
    let id = ContextId::new("mine");
    let payload = Payload::new(json!({"mine": true}));

    let noise = async {
        for n in 0..20 {
            let other = ContextId::new(format!("other-{n}"));
            fixture
                .manager
                .store(&other, &Payload::new(json!({"n": n})), SourceSystem::SystemB)
                .await
                .unwrap();
        }
    };
    let mine = async {
        fixture
            .manager
            .store(&id, &payload, SourceSystem::SystemA)
            .await
            .unwrap();
        fixture.manager.get(&id).await.unwrap()
    };
    let (_, observed) = tokio::join!(noise, mine);
    assert_eq!(observed, payload);
}

#[tokio::test]
async fn second_get_is_served_from_cache() {
    let fixture = default_engine();
    let id = ContextId::new("hot");
    fixture
        .manager
        .store(&id, &Payload::new(json!({"a": 1})), SourceSystem::SystemA)
        .await
        .unwrap();

    // First get misses (store invalidates, never populates) and fills L1.
    fixture.manager.get(&id).await.unwrap();
    fixture.manager.get(&id).await.unwrap();

    let metrics = fixture.manager.metrics().await;
    assert_eq!(metrics.cache.misses, 1);
    assert_eq!(metrics.cache.l1_hits, 1);
}

#[tokio::test]
async fn get_unknown_context_is_not_found() {
    let fixture = default_engine();
    let err = fixture
        .manager
        .get(&ContextId::new("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn oversized_store_is_a_validation_error() {
    let fixture = default_engine();
    let id = ContextId::new("big");
    let oversized = Payload::new(json!({"blob": "x".repeat(11 * 1024 * 1024)}));
    let err = fixture
        .manager
        .store(&id, &oversized, SourceSystem::SystemA)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn merge_contexts_union_commits_a_new_merged_context() {
    let fixture = default_engine();
    let first = ContextId::new("m1");
    let second = ContextId::new("m2");
    fixture
        .manager
        .store(&first, &Payload::new(json!({"a": 1})), SourceSystem::SystemA)
        .await
        .unwrap();
    fixture
        .manager
        .store(&second, &Payload::new(json!({"b": 2})), SourceSystem::SystemB)
        .await
        .unwrap();

    let merged_id = fixture
        .manager
        .merge_contexts(&[first.clone(), second.clone()], MergeStrategy::Union)
        .await
        .unwrap();
    assert_ne!(merged_id, first);
    assert_ne!(merged_id, second);

    let merged = fixture.manager.get_current(&merged_id).unwrap();
    assert_eq!(merged.payload.as_value(), &json!({"a": 1, "b": 2}));
    assert_eq!(merged.source_system, SourceSystem::Merged);
    // Source contexts are untouched.
    assert_eq!(fixture.manager.get_current(&first).unwrap().current_version, 1);
}

#[tokio::test]
async fn merge_contexts_latest_takes_newest_whole_payload() {
    let fixture = default_engine();
    let first = ContextId::new("m1");
    let second = ContextId::new("m2");
    fixture
        .manager
        .store(&first, &Payload::new(json!({"old": true})), SourceSystem::SystemA)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    fixture
        .manager
        .store(&second, &Payload::new(json!({"new": true})), SourceSystem::SystemA)
        .await
        .unwrap();

    let merged_id = fixture
        .manager
        .merge_contexts(&[first, second], MergeStrategy::Latest)
        .await
        .unwrap();
    let merged = fixture.manager.get_current(&merged_id).unwrap();
    assert_eq!(merged.payload.as_value(), &json!({"new": true}));
}

#[tokio::test]
async fn merge_contexts_with_no_ids_is_rejected() {
    let fixture = default_engine();
    let err = fixture
        .manager
        .merge_contexts(&[], MergeStrategy::Union)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn merge_contexts_with_unknown_id_is_not_found() {
    let fixture = default_engine();
    let known = ContextId::new("known");
    fixture
        .manager
        .store(&known, &Payload::new(json!({})), SourceSystem::SystemA)
        .await
        .unwrap();
    let err = fixture
        .manager
        .merge_contexts(&[known, ContextId::new("ghost")], MergeStrategy::Union)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn warm_preloads_contexts_into_the_cache() {
    let fixture = default_engine();
    let id = ContextId::new("warmed");
    fixture
        .manager
        .store(&id, &Payload::new(json!({"w": 1})), SourceSystem::SystemA)
        .await
        .unwrap();

    fixture.manager.warm(&[id.clone()]).await.unwrap();
    fixture.manager.get(&id).await.unwrap();

    let metrics = fixture.manager.metrics().await;
    assert_eq!(metrics.cache.misses, 0);
    assert_eq!(metrics.cache.l1_hits, 1);
}

#[tokio::test]
async fn search_similar_finds_indexed_contexts() {
    let fixture = default_engine();
    let id = ContextId::new("searchable");
    fixture.system_a.set_view(&id, json!({"topic": "caching"}), 1_000);
    fixture.engine.sync_now(&[id.clone()]).await.unwrap();

    // The embedder is deterministic, so the committed payload text queries
    // back with perfect similarity.
    let query = Payload::new(json!({"topic": "caching"}));
    let query_text = String::from_utf8(query.canonical_bytes()).unwrap();
    let matches = fixture
        .manager
        .search_similar(&query_text, 5, 0.9)
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].context_id, id);
    assert!(matches[0].score > 0.99);
}

#[tokio::test]
async fn metrics_combine_store_cache_and_sync_counters() {
    let fixture = default_engine();
    let id = ContextId::new("counted");
    fixture
        .manager
        .store(&id, &Payload::new(json!({"a": 1})), SourceSystem::SystemA)
        .await
        .unwrap();
    fixture.manager.get(&id).await.unwrap();
    fixture.system_a.set_view(&id, json!({"a": 2}), 1_000);
    fixture.manager.sync_now(&[id.clone()]).await.unwrap();

    let metrics = fixture.manager.metrics().await;
    assert_eq!(metrics.store.contexts, 1);
    assert_eq!(metrics.store.versions, 2);
    assert_eq!(metrics.sync.passes, 1);
    assert_eq!(metrics.sync.committed, 1);
    assert!(metrics.cache.misses >= 1);
}

#[tokio::test]
async fn shutdown_stops_background_sync() {
    let fixture = default_engine();
    let handle = fixture.engine.spawn_periodic();
    fixture.manager.shutdown().await;
    handle.await.unwrap();
}
