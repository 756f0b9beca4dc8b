//! Telemetry: timestamps, sync pass counters, and the metrics sink.
//!
//! Metrics are pushed fire-and-forget after each sync pass; a sink that drops
//! or fails never affects the pass outcome.

use crate::cache::CacheMetrics;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Current time as milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sync engine counters, updated in place by passes.
#[derive(Debug, Default)]
pub struct SyncCounters {
    pub passes: AtomicU64,
    pub committed: AtomicU64,
    pub rolled_back: AtomicU64,
    pub partial_fetches: AtomicU64,
    pub conflicts_resolved: AtomicU64,
    pub index_retries: AtomicU64,
    pub last_pass_millis: AtomicU64,
}

impl SyncCounters {
    pub fn snapshot(&self) -> SyncMetrics {
        SyncMetrics {
            passes: self.passes.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            partial_fetches: self.partial_fetches.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            index_retries: self.index_retries.load(Ordering::Relaxed),
            last_pass_millis: self.last_pass_millis.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of sync engine counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub passes: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub partial_fetches: u64,
    pub conflicts_resolved: u64,
    pub index_retries: u64,
    pub last_pass_millis: u64,
}

/// Version store size counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub contexts: u64,
    pub versions: u64,
}

/// Combined engine metrics: store + cache + sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub store: StoreMetrics,
    pub cache: CacheMetrics,
    pub sync: SyncMetrics,
}

/// Push-based observability sink. Fire-and-forget: implementations must not
/// block or fail in ways visible to the engine.
pub trait MetricsSink: Send + Sync {
    fn publish(&self, snapshot: &MetricsSnapshot);
}

/// Default sink: emits snapshots as structured tracing events.
#[derive(Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn publish(&self, snapshot: &MetricsSnapshot) {
        info!(
            target: "context_sync::metrics",
            contexts = snapshot.store.contexts,
            versions = snapshot.store.versions,
            overall_hit_rate = snapshot.cache.overall_hit_rate,
            sync_passes = snapshot.sync.passes,
            rolled_back = snapshot.sync.rolled_back,
            conflicts_resolved = snapshot.sync.conflicts_resolved,
            last_pass_millis = snapshot.sync.last_pass_millis,
            "engine metrics"
        );
    }
}
