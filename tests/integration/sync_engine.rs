//! Integration tests for sync passes: merge commit flow, partial fetches,
//! rollback on commit failure, and index retry behavior.

use super::test_utils::{build_engine, default_engine, TestEngineOptions};
use context_sync::config::StoreConfig;
use context_sync::merge::{AuthorityRule, MergeAuthority};
use context_sync::sync::{PassOutcome, PassPhase};
use context_sync::types::{ContextId, Payload, SourceSystem};
use serde_json::json;

#[tokio::test]
async fn non_overlapping_views_commit_a_clean_union() {
    let fixture = default_engine();
    let id = ContextId::new("c1");
    fixture.system_a.set_view(&id, json!({"a": 1}), 1_000);
    fixture.system_b.set_view(&id, json!({"b": 2}), 1_000);

    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    assert!(matches!(
        report.outcome,
        PassOutcome::Committed {
            contexts_committed: 1,
            ..
        }
    ));
    let (_, conflict) = &report.conflict_reports[0];
    assert!(conflict.is_clean());

    let current = fixture.store.get_current(&id).unwrap();
    assert_eq!(current.payload.as_value(), &json!({"a": 1, "b": 2}));
    assert_eq!(current.source_system, SourceSystem::Merged);

    // Committed payload is readable straight from the cache.
    let cached = fixture.cache.get(id.as_str()).await.unwrap();
    assert_eq!(Payload::from_bytes(&cached).unwrap().as_value(), &json!({"a": 1, "b": 2}));

    // And it reached the vector sink with version metadata.
    let entry = fixture.sink.entry(&id).unwrap();
    assert_eq!(entry.metadata.get("version").unwrap(), "1");
}

#[tokio::test]
async fn later_fetch_wins_contested_field() {
    let fixture = default_engine();
    let id = ContextId::new("c1");
    fixture.system_a.set_view(&id, json!({"x": "a"}), 1_000);
    fixture.system_b.set_view(&id, json!({"x": "b"}), 2_000);

    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    let (_, conflict) = &report.conflict_reports[0];
    assert_eq!(conflict.decisions.len(), 1);
    assert_eq!(conflict.decisions[0].field, "x");
    assert_eq!(conflict.decisions[0].winner, SourceSystem::SystemB);

    let current = fixture.store.get_current(&id).unwrap();
    assert_eq!(current.payload.as_value(), &json!({"x": "b"}));
    assert_eq!(fixture.engine.metrics().conflicts_resolved, 1);
}

#[tokio::test]
async fn configured_authority_beats_recency() {
    let fixture = build_engine(TestEngineOptions {
        authority: MergeAuthority::new().assign("owner", AuthorityRule::SystemA),
        ..TestEngineOptions::default()
    });
    let id = ContextId::new("c1");
    fixture.system_a.set_view(&id, json!({"owner": "a"}), 1_000);
    fixture.system_b.set_view(&id, json!({"owner": "b"}), 9_000);

    fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    let current = fixture.store.get_current(&id).unwrap();
    assert_eq!(current.payload.as_value(), &json!({"owner": "a"}));
}

#[tokio::test]
async fn unreachable_side_yields_partial_sync_not_failure() {
    let fixture = default_engine();
    let id = ContextId::new("c1");
    fixture.system_a.set_view(&id, json!({"a": 1}), 1_000);
    fixture.system_b.set_unavailable(true);

    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    assert!(matches!(
        report.outcome,
        PassOutcome::Committed {
            contexts_committed: 1,
            ..
        }
    ));
    let (_, conflict) = &report.conflict_reports[0];
    assert_eq!(conflict.missing_side, Some(SourceSystem::SystemB));
    assert_eq!(fixture.engine.metrics().partial_fetches, 1);

    let current = fixture.store.get_current(&id).unwrap();
    assert_eq!(current.payload.as_value(), &json!({"a": 1}));
}

#[tokio::test]
async fn both_sides_silent_skips_the_context() {
    let fixture = default_engine();
    let id = ContextId::new("c1");

    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    assert!(matches!(
        report.outcome,
        PassOutcome::Committed {
            contexts_committed: 0,
            skipped: 1,
        }
    ));
    assert!(fixture.store.get_current(&id).is_err());
}

#[tokio::test]
async fn unchanged_merged_payload_is_not_recommitted() {
    let fixture = default_engine();
    let id = ContextId::new("c1");
    fixture.system_a.set_view(&id, json!({"a": 1}), 1_000);

    fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    assert_eq!(fixture.store.get_current(&id).unwrap().current_version, 1);

    // Same view again: fingerprint matches the committed payload.
    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    assert!(matches!(
        report.outcome,
        PassOutcome::Committed {
            contexts_committed: 0,
            skipped: 1,
        }
    ));
    assert_eq!(fixture.store.get_current(&id).unwrap().current_version, 1);
}

#[tokio::test]
async fn failed_commit_rolls_back_every_touched_context() {
    let fixture = build_engine(TestEngineOptions {
        store: StoreConfig {
            max_payload_bytes: 256,
            ..StoreConfig::default()
        },
        ..TestEngineOptions::default()
    });
    let first = ContextId::new("c1");
    let second = ContextId::new("c2");

    // Pre-pass committed state for both contexts.
    fixture
        .store
        .commit(&first, &Payload::new(json!({"seed": 1})), SourceSystem::SystemA)
        .unwrap();
    fixture
        .store
        .commit(&second, &Payload::new(json!({"seed": 2})), SourceSystem::SystemA)
        .unwrap();

    // c1 merges cleanly; c2's merged payload blows the size cap at commit.
    fixture.system_a.set_view(&first, json!({"update": "small"}), 1_000);
    fixture
        .system_b
        .set_view(&second, json!({"blob": "x".repeat(600)}), 1_000);

    let report = fixture
        .engine
        .sync_now(&[first.clone(), second.clone()])
        .await
        .unwrap();
    match report.outcome {
        PassOutcome::RolledBack { reason } => {
            assert!(reason.starts_with("Commit phase failed"), "reason: {reason}");
        }
        other => panic!("expected rollback, got {other:?}"),
    }

    // Both contexts are back at their pre-pass state, including c1 whose
    // commit had already succeeded within the failed pass.
    let current_first = fixture.store.get_current(&first).unwrap();
    assert_eq!(current_first.current_version, 1);
    assert_eq!(current_first.payload.as_value(), &json!({"seed": 1}));
    let current_second = fixture.store.get_current(&second).unwrap();
    assert_eq!(current_second.current_version, 1);
    assert_eq!(current_second.payload.as_value(), &json!({"seed": 2}));

    // No version rows from the failed pass remain reachable.
    assert_eq!(fixture.store.list_versions(&first, 10, None).unwrap().len(), 1);
    assert_eq!(fixture.engine.metrics().rolled_back, 1);
}

#[tokio::test]
async fn rollback_removes_contexts_created_by_the_failed_pass() {
    let fixture = build_engine(TestEngineOptions {
        store: StoreConfig {
            max_payload_bytes: 256,
            ..StoreConfig::default()
        },
        ..TestEngineOptions::default()
    });
    let fresh = ContextId::new("c1");
    let doomed = ContextId::new("c2");

    fixture.system_a.set_view(&fresh, json!({"a": 1}), 1_000);
    fixture
        .system_b
        .set_view(&doomed, json!({"blob": "x".repeat(600)}), 1_000);

    let report = fixture
        .engine
        .sync_now(&[fresh.clone(), doomed.clone()])
        .await
        .unwrap();
    assert!(matches!(report.outcome, PassOutcome::RolledBack { .. }));

    // The context created mid-pass was rewound out of existence.
    assert!(fixture.store.get_current(&fresh).is_err());
    assert!(fixture.store.get_current(&doomed).is_err());
    assert_eq!(fixture.cache.get(fresh.as_str()).await, None);
}

#[tokio::test]
async fn index_failure_keeps_commits_and_retries_next_pass() {
    let fixture = default_engine();
    let id = ContextId::new("c1");
    fixture.system_a.set_view(&id, json!({"a": 1}), 1_000);
    fixture.sink.fail_next_upserts(1);

    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    match report.outcome {
        PassOutcome::PartialIndexFailure {
            contexts_committed,
            pending_index,
        } => {
            assert_eq!(contexts_committed, 1);
            assert_eq!(pending_index, 1);
        }
        other => panic!("expected partial index failure, got {other:?}"),
    }
    // The commit itself stands.
    assert_eq!(fixture.store.get_current(&id).unwrap().current_version, 1);
    assert_eq!(fixture.sink.len(), 0);

    // Next pass drains the retry queue even with nothing new to commit.
    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    assert!(matches!(report.outcome, PassOutcome::Committed { .. }));
    assert_eq!(fixture.sink.len(), 1);
    assert_eq!(fixture.indexer.pending_len().await, 0);
}

#[tokio::test]
async fn disjoint_context_sets_sync_concurrently() {
    let fixture = default_engine();
    let left = ContextId::new("left");
    let right = ContextId::new("right");
    fixture.system_a.set_view(&left, json!({"l": 1}), 1_000);
    fixture.system_a.set_view(&right, json!({"r": 1}), 1_000);

    let (first, second) = tokio::join!(
        fixture.engine.sync_now(std::slice::from_ref(&left)),
        fixture.engine.sync_now(std::slice::from_ref(&right)),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(fixture.store.get_current(&left).unwrap().current_version, 1);
    assert_eq!(fixture.store.get_current(&right).unwrap().current_version, 1);
    // The phase label is advisory under concurrency but settles at Idle.
    assert_eq!(fixture.engine.phase(), PassPhase::Idle);
}

#[tokio::test]
async fn caller_store_during_failing_pass_survives_rollback() {
    let fixture = build_engine(TestEngineOptions {
        store: StoreConfig {
            max_payload_bytes: 256,
            ..StoreConfig::default()
        },
        ..TestEngineOptions::default()
    });
    let victim = ContextId::new("victim");
    let doomed = ContextId::new("zz-doomed");
    fixture
        .manager
        .store(&victim, &Payload::new(json!({"seed": 1})), SourceSystem::SystemA)
        .await
        .unwrap();

    // Slow fetches keep the pass in flight while the caller writes; the
    // oversized view makes the pass fail at commit and roll back.
    fixture.system_a.set_latency(300);
    fixture.system_a.set_view(&victim, json!({"update": "small"}), 1_000);
    fixture
        .system_b
        .set_view(&doomed, json!({"blob": "x".repeat(600)}), 1_000);

    let engine = fixture.engine.clone();
    let ids = vec![victim.clone(), doomed.clone()];
    let pass = tokio::spawn(async move { engine.sync_now(&ids).await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let version = fixture
        .manager
        .store(&victim, &Payload::new(json!({"caller": true})), SourceSystem::SystemA)
        .await
        .unwrap();

    let report = pass.await.unwrap().unwrap();
    assert!(matches!(report.outcome, PassOutcome::RolledBack { .. }));

    // The write waited the pass out, so the rollback could not erase it and
    // its version number is never reused.
    assert_eq!(version, 2);
    let current = fixture.store.get_current(&victim).unwrap();
    assert_eq!(current.current_version, 2);
    assert_eq!(current.payload.as_value(), &json!({"caller": true}));
    assert_eq!(
        fixture.manager.get(&victim).await.unwrap().as_value(),
        &json!({"caller": true})
    );
}

#[tokio::test]
async fn caller_store_during_successful_pass_is_not_overwritten() {
    let fixture = default_engine();
    let id = ContextId::new("busy");
    fixture
        .manager
        .store(&id, &Payload::new(json!({"seed": 1})), SourceSystem::SystemA)
        .await
        .unwrap();
    fixture.system_a.set_latency(300);
    fixture.system_a.set_view(&id, json!({"update": "merge"}), 1_000);

    let engine = fixture.engine.clone();
    let ids = vec![id.clone()];
    let pass = tokio::spawn(async move { engine.sync_now(&ids).await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let version = fixture
        .manager
        .store(&id, &Payload::new(json!({"caller": true})), SourceSystem::SystemA)
        .await
        .unwrap();

    let report = pass.await.unwrap().unwrap();
    assert!(matches!(
        report.outcome,
        PassOutcome::Committed {
            contexts_committed: 1,
            ..
        }
    ));

    // Pass committed its merge as version 2; the caller write landed after
    // it as version 3 instead of being overwritten by a stale-base merge.
    assert_eq!(version, 3);
    let current = fixture.store.get_current(&id).unwrap();
    assert_eq!(current.current_version, 3);
    assert_eq!(current.payload.as_value(), &json!({"caller": true}));
}

#[tokio::test]
async fn fetch_slower_than_timeout_degrades_to_partial_sync() {
    let fixture = default_engine();
    let id = ContextId::new("c1");
    fixture.system_a.set_view(&id, json!({"a": 1}), 1_000);
    // fetch_timeout_ms is 500 in the test options; System B never answers
    // in time even though it has a view.
    fixture.system_b.set_latency(2_000);
    fixture.system_b.set_view(&id, json!({"b": 2}), 1_000);

    let report = fixture.engine.sync_now(&[id.clone()]).await.unwrap();
    assert!(matches!(
        report.outcome,
        PassOutcome::Committed {
            contexts_committed: 1,
            ..
        }
    ));
    let (_, conflict) = &report.conflict_reports[0];
    assert_eq!(conflict.missing_side, Some(SourceSystem::SystemB));

    let current = fixture.store.get_current(&id).unwrap();
    assert_eq!(current.payload.as_value(), &json!({"a": 1}));
    assert_eq!(fixture.engine.metrics().partial_fetches, 1);
}

#[tokio::test]
async fn periodic_tick_synchronizes_tracked_contexts() {
    let fixture = default_engine();
    let id = ContextId::new("ticked");
    fixture.system_a.set_view(&id, json!({"a": 1}), 1_000);
    fixture.engine.track(&id);

    let handle = fixture.engine.spawn_periodic();
    // interval_secs is 1 in the test options; give it two ticks.
    tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;
    fixture.engine.stop();
    handle.await.unwrap();

    assert_eq!(fixture.store.get_current(&id).unwrap().current_version, 1);
    assert!(fixture.engine.metrics().passes >= 1);
}
