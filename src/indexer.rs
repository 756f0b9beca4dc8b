//! Vector Indexer
//!
//! Turns committed merged contexts into similarity-searchable entries. Owns
//! embedding request batching and a bounded retry queue only; the vector
//! store itself is an external sink. Index staleness is acceptable and
//! self-healing: failed entries are retried on the next sync pass, never by
//! rolling back a committed version.

use crate::config::IndexerConfig;
use crate::error::IndexError;
use crate::types::{ContextId, Payload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Produces embeddings for batches of serialized payloads.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;
}

/// One entry handed to the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub context_id: ContextId,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

/// Nearest-neighbor match returned by the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub context_id: ContextId,
    pub score: f32,
}

/// External vector-similarity store.
#[async_trait]
pub trait VectorSink: Send + Sync {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), IndexError>;

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityMatch>, IndexError>;
}

#[derive(Debug, Clone)]
struct PendingEntry {
    context_id: ContextId,
    version: u64,
    text: String,
    fingerprint: String,
}

/// Batching front-end for the vector sink.
pub struct VectorIndexer {
    embedder: Arc<dyn EmbeddingClient>,
    sink: Arc<dyn VectorSink>,
    pending: Mutex<VecDeque<PendingEntry>>,
    config: IndexerConfig,
    retries: AtomicU64,
    dropped: AtomicU64,
}

impl VectorIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        sink: Arc<dyn VectorSink>,
        config: IndexerConfig,
    ) -> Self {
        VectorIndexer {
            embedder,
            sink,
            pending: Mutex::new(VecDeque::new()),
            config,
            retries: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a committed context version for indexing. A newer version of
    /// the same context replaces any queued older one.
    pub async fn enqueue(&self, context_id: &ContextId, version: u64, payload: &Payload) {
        let entry = PendingEntry {
            context_id: context_id.clone(),
            version,
            text: String::from_utf8_lossy(&payload.canonical_bytes()).into_owned(),
            fingerprint: payload.fingerprint(),
        };
        let mut pending = self.pending.lock().await;
        pending.retain(|queued| queued.context_id != entry.context_id);
        if pending.len() >= self.config.max_pending {
            pending.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(context_id = %entry.context_id, "index queue full, dropped oldest entry");
        }
        pending.push_back(entry);
    }

    /// Embed and upsert queued entries in batches.
    ///
    /// On failure the unprocessed remainder (including the failing batch)
    /// stays queued for the next pass. Returns the number of entries
    /// successfully indexed.
    pub async fn process_pending(&self) -> Result<usize, IndexError> {
        let mut indexed = 0usize;
        loop {
            let batch: Vec<PendingEntry> = {
                let mut pending = self.pending.lock().await;
                let take = pending.len().min(self.config.batch_size);
                pending.drain(..take).collect()
            };
            if batch.is_empty() {
                return Ok(indexed);
            }

            match self.index_batch(&batch).await {
                Ok(()) => {
                    indexed += batch.len();
                    debug!(batch = batch.len(), "indexed context batch");
                }
                Err(err) => {
                    self.retries.fetch_add(batch.len() as u64, Ordering::Relaxed);
                    let mut pending = self.pending.lock().await;
                    for entry in batch.into_iter().rev() {
                        pending.push_front(entry);
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn index_batch(&self, batch: &[PendingEntry]) -> Result<(), IndexError> {
        let texts: Vec<String> = batch.iter().map(|entry| entry.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != batch.len() {
            return Err(IndexError::Embedding(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                embeddings.len()
            )));
        }

        let entries: Vec<VectorEntry> = batch
            .iter()
            .zip(embeddings)
            .map(|(entry, embedding)| {
                let mut metadata = HashMap::new();
                metadata.insert("version".to_string(), entry.version.to_string());
                metadata.insert("fingerprint".to_string(), entry.fingerprint.clone());
                VectorEntry {
                    context_id: entry.context_id.clone(),
                    embedding,
                    metadata,
                }
            })
            .collect();
        self.sink.upsert(&entries).await
    }

    /// Embed a query string and run a nearest-neighbor search.
    ///
    /// Results are no fresher than the last successful indexing phase.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityMatch>, IndexError> {
        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))?;
        self.sink.query(&embedding, limit, threshold).await
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// HTTP JSON adapter for vector stores exposing upsert and query endpoints.
pub struct HttpVectorSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpVectorSink {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    matches: Vec<SimilarityMatch>,
}

#[async_trait]
impl VectorSink for HttpVectorSink {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), IndexError> {
        let response = self
            .client
            .post(format!("{}/vectors/upsert", self.base_url))
            .json(&json!({ "entries": entries }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(IndexError::Sink(format!(
                "upsert returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityMatch>, IndexError> {
        let response = self
            .client
            .post(format!("{}/vectors/query", self.base_url))
            .json(&json!({
                "embedding": embedding,
                "limit": limit,
                "threshold": threshold,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(IndexError::Sink(format!(
                "query returned {}",
                response.status()
            )));
        }
        let body: QueryResponse = response.json().await?;
        Ok(body.matches)
    }
}
