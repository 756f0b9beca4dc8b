//! Context Manager
//!
//! Public façade over the version store, tier cache, sync engine, and vector
//! indexer. Callers see store/get/search/merge/metrics and the error
//! taxonomy in [`crate::error::EngineError`]; sync-pass machinery stays
//! internal.

use crate::cache::TierCache;
use crate::error::{EngineError, StorageError};
use crate::indexer::{SimilarityMatch, VectorIndexer};
use crate::sync::SyncEngine;
use crate::store::VersionStore;
use crate::telemetry::MetricsSnapshot;
use crate::types::{CacheTier, Context, ContextId, Payload, SourceSystem};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Strategy for an explicit caller-invoked merge of several contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Field union across all payloads; on collision the most recently
    /// updated context wins.
    Union,
    /// Whole payload of the most recently updated context.
    Latest,
    /// Only fields present in every payload, valued from the most recently
    /// updated context.
    Intersection,
}

/// Public engine façade.
pub struct ContextManager {
    store: Arc<VersionStore>,
    cache: Arc<TierCache>,
    engine: Arc<SyncEngine>,
    indexer: Arc<VectorIndexer>,
}

impl ContextManager {
    pub fn new(
        store: Arc<VersionStore>,
        cache: Arc<TierCache>,
        engine: Arc<SyncEngine>,
        indexer: Arc<VectorIndexer>,
    ) -> Self {
        ContextManager {
            store,
            cache,
            engine,
            indexer,
        }
    }

    /// Commit a new version and invalidate the cache for this context.
    ///
    /// Serializes against any in-flight sync pass touching this context, so
    /// an acknowledged write can never be erased by that pass's rollback or
    /// overwritten by a merge computed from a stale base. The cache is not
    /// repopulated here: the next read fills it, which avoids caching a
    /// value a sync merge may immediately supersede. The context is
    /// registered for periodic synchronization.
    pub async fn store(
        &self,
        id: &ContextId,
        payload: &Payload,
        source: SourceSystem,
    ) -> Result<u64, EngineError> {
        let _pass_guard = self.engine.write_guard(id).await;
        let version = self.store.commit(id, payload, source)?;
        self.cache.invalidate(id.as_str()).await;
        self.engine.track(id);
        Ok(version)
    }

    /// Read a context payload through the cache.
    ///
    /// Cache probe first (L1 → L2 → L3 with promotion); on a full miss the
    /// version store is read and the cache repopulated. A cache entry that
    /// fails to decode is dropped and the read falls through to the store.
    pub async fn get(&self, id: &ContextId) -> Result<Payload, EngineError> {
        if let Some(bytes) = self.cache.get(id.as_str()).await {
            match Payload::from_bytes(&bytes) {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    warn!(context_id = %id, error = %err, "corrupt cache entry, invalidating");
                    self.cache.invalidate(id.as_str()).await;
                }
            }
        }
        let context = self.store.get_current(id)?;
        self.cache
            .set(id.as_str(), &context.payload.canonical_bytes(), CacheTier::L1)
            .await;
        Ok(context.payload)
    }

    /// Current committed view, bypassing the cache. Includes version and
    /// provenance.
    pub fn get_current(&self, id: &ContextId) -> Result<Context, EngineError> {
        Ok(self.store.get_current(id)?)
    }

    /// History for a context, newest first, with cursor pagination.
    pub fn list_versions(
        &self,
        id: &ContextId,
        limit: usize,
        before_version: Option<u64>,
    ) -> Result<Vec<crate::types::ContextVersion>, EngineError> {
        Ok(self.store.list_versions(id, limit, before_version)?)
    }

    /// Nearest-neighbor search over indexed contexts.
    ///
    /// Results are no fresher than the last successful indexing phase.
    pub async fn search_similar(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityMatch>, EngineError> {
        Ok(self.indexer.search(query, limit, threshold).await?)
    }

    /// Explicit caller-invoked merge of several contexts into a new one.
    ///
    /// Distinct from the two-system sync merge: applies the chosen strategy
    /// across the current payloads and commits the result as a new context
    /// with `Merged` provenance.
    pub async fn merge_contexts(
        &self,
        ids: &[ContextId],
        strategy: MergeStrategy,
    ) -> Result<ContextId, EngineError> {
        if ids.is_empty() {
            return Err(EngineError::Validation(
                "merge_contexts requires at least one context id".to_string(),
            ));
        }
        let mut contexts = Vec::with_capacity(ids.len());
        for id in ids {
            contexts.push(self.store.get_current(id)?);
        }
        let merged = apply_strategy(&contexts, strategy);

        let new_id = ContextId::generate();
        let version = self.store.commit(&new_id, &merged, SourceSystem::Merged)?;
        self.engine.track(&new_id);
        debug!(new_context = %new_id, version, sources = ids.len(), strategy = ?strategy, "merged contexts");
        Ok(new_id)
    }

    /// Proactively load contexts expected to be hot into all tiers.
    pub async fn warm(&self, ids: &[ContextId]) -> Result<(), EngineError> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_current(id) {
                Ok(context) => entries.push((
                    id.as_str().to_string(),
                    context.payload.canonical_bytes(),
                )),
                Err(StorageError::ContextNotFound(_)) => {
                    warn!(context_id = %id, "warm skipped unknown context");
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.cache.warm(entries).await;
        Ok(())
    }

    /// Trigger an immediate sync pass for the given contexts (all tracked
    /// when empty).
    pub async fn sync_now(
        &self,
        ids: &[ContextId],
    ) -> Result<crate::sync::SyncReport, EngineError> {
        Ok(self.engine.sync_now(ids).await?)
    }

    /// Combined store + cache + sync counters.
    pub async fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            store: self.store.metrics(),
            cache: self.cache.metrics().await,
            sync: self.engine.metrics(),
        }
    }

    /// Stop background synchronization and drain the cache tiers.
    pub async fn shutdown(&self) {
        self.engine.stop();
        self.cache.flush().await;
    }
}

fn apply_strategy(contexts: &[Context], strategy: MergeStrategy) -> Payload {
    // Oldest-first so later (more recently updated) contexts overwrite on
    // collision; context id breaks updated_at ties deterministically.
    let mut ordered: Vec<&Context> = contexts.iter().collect();
    ordered.sort_by(|a, b| {
        a.updated_at
            .cmp(&b.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    match strategy {
        MergeStrategy::Latest => ordered
            .last()
            .map(|c| c.payload.clone())
            .unwrap_or_else(|| Payload::new(Value::Null)),
        MergeStrategy::Union => {
            let mut merged = Map::new();
            for context in &ordered {
                if let Some(fields) = context.payload.fields() {
                    for (key, value) in fields {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Payload::new(Value::Object(merged))
        }
        MergeStrategy::Intersection => {
            let mut merged = Map::new();
            if let Some(latest_fields) = ordered.last().and_then(|c| c.payload.fields()) {
                for (key, value) in latest_fields {
                    let everywhere = ordered.iter().all(|context| {
                        context
                            .payload
                            .fields()
                            .is_some_and(|fields| fields.contains_key(key))
                    });
                    if everywhere {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Payload::new(Value::Object(merged))
        }
    }
}
