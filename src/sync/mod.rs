//! Sync Engine
//!
//! Orchestrates periodic and on-demand synchronization between the two
//! producer systems. Each pass runs the phase sequence Snapshotting →
//! Fetching → Merging → Committing → Indexing; any commit failure after the
//! snapshot transitions to RollingBack and restores the pre-pass state.
//! Indexing failures never roll back committed versions — index staleness is
//! self-healing, version inconsistency is not.

pub mod locks;

use crate::cache::TierCache;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::external::{ExternalSystem, FetchedView};
use crate::merge::{merge, ConflictReport, MergeAuthority};
use crate::store::VersionStore;
use crate::telemetry::{MetricsSink, MetricsSnapshot, SyncCounters, SyncMetrics};
use crate::types::{CacheTier, ContextId, Payload, SourceSystem};
use crate::indexer::VectorIndexer;
use chrono::{DateTime, Utc};
use locks::LockRegistry;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Phase of the current (or last) sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Idle,
    Snapshotting,
    Fetching,
    Merging,
    Committing,
    Indexing,
    RollingBack,
}

impl PassPhase {
    pub fn label(&self) -> &'static str {
        match self {
            PassPhase::Idle => "idle",
            PassPhase::Snapshotting => "snapshotting",
            PassPhase::Fetching => "fetching",
            PassPhase::Merging => "merging",
            PassPhase::Committing => "committing",
            PassPhase::Indexing => "indexing",
            PassPhase::RollingBack => "rolling_back",
        }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    /// All merged contexts committed and indexed.
    Committed {
        contexts_committed: usize,
        skipped: usize,
    },
    /// A commit failed; every touched context was rewound to its pre-pass
    /// state. The next tick retries from scratch.
    RolledBack { reason: String },
    /// Commits succeeded but indexing did not finish; the remainder is
    /// queued for the next pass.
    PartialIndexFailure {
        contexts_committed: usize,
        pending_index: usize,
    },
}

/// Full record of one sync pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: PassOutcome,
    pub conflict_reports: Vec<(ContextId, ConflictReport)>,
    pub started_at: DateTime<Utc>,
    pub duration_millis: u64,
}

struct MergedItem {
    id: ContextId,
    payload: Payload,
}

/// Cross-system synchronization orchestrator.
pub struct SyncEngine {
    store: Arc<VersionStore>,
    cache: Arc<TierCache>,
    indexer: Arc<VectorIndexer>,
    system_a: Arc<dyn ExternalSystem>,
    system_b: Arc<dyn ExternalSystem>,
    locks: LockRegistry,
    config: SyncConfig,
    authority: MergeAuthority,
    tracked: RwLock<BTreeSet<ContextId>>,
    counters: SyncCounters,
    sink: Arc<dyn MetricsSink>,
    phase: RwLock<PassPhase>,
    shutdown: Notify,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<VersionStore>,
        cache: Arc<TierCache>,
        indexer: Arc<VectorIndexer>,
        system_a: Arc<dyn ExternalSystem>,
        system_b: Arc<dyn ExternalSystem>,
        config: SyncConfig,
        authority: MergeAuthority,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        SyncEngine {
            store,
            cache,
            indexer,
            system_a,
            system_b,
            locks: LockRegistry::new(),
            config,
            authority,
            tracked: RwLock::new(BTreeSet::new()),
            counters: SyncCounters::default(),
            sink,
            phase: RwLock::new(PassPhase::Idle),
            shutdown: Notify::new(),
        }
    }

    /// Register a context for periodic synchronization.
    pub fn track(&self, id: &ContextId) {
        self.tracked.write().insert(id.clone());
    }

    pub fn untrack(&self, id: &ContextId) {
        self.tracked.write().remove(id);
    }

    pub fn tracked(&self) -> Vec<ContextId> {
        self.tracked.read().iter().cloned().collect()
    }

    /// Phase label of the most recent transition, advisory only. Concurrent
    /// passes over disjoint context sets update it last-writer-wins; it
    /// reads `Idle` once no pass is running.
    pub fn phase(&self) -> PassPhase {
        *self.phase.read()
    }

    /// Hold the pass lock for one context on behalf of a caller write.
    ///
    /// A write landing while a pass has this context mid-flight would slot
    /// into the pass's rollback window and be erased; holding the lock makes
    /// the write wait the pass out instead.
    pub(crate) async fn write_guard(&self, id: &ContextId) -> Vec<OwnedMutexGuard<()>> {
        self.locks.acquire_set(std::slice::from_ref(id)).await
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.counters.snapshot()
    }

    /// Run one pass immediately over the given contexts (all tracked
    /// contexts when empty). Waits for any in-flight pass over an
    /// overlapping context set.
    pub async fn sync_now(&self, ids: &[ContextId]) -> Result<SyncReport, SyncError> {
        let ids = if ids.is_empty() {
            self.tracked()
        } else {
            ids.to_vec()
        };
        self.run_pass(ids).await
    }

    fn set_phase(&self, phase: PassPhase) {
        *self.phase.write() = phase;
        debug!(phase = phase.label(), "sync phase");
    }

    async fn run_pass(&self, mut ids: Vec<ContextId>) -> Result<SyncReport, SyncError> {
        ids.sort();
        ids.dedup();
        let started_at = Utc::now();
        let pass_start = Instant::now();

        if ids.is_empty() {
            return Ok(SyncReport {
                outcome: PassOutcome::Committed {
                    contexts_committed: 0,
                    skipped: 0,
                },
                conflict_reports: Vec::new(),
                started_at,
                duration_millis: 0,
            });
        }

        let _guards = self.locks.acquire_set(&ids).await;

        self.set_phase(PassPhase::Snapshotting);
        let snapshot = self.store.create_snapshot(&ids)?;

        self.set_phase(PassPhase::Fetching);
        let mut fetched: Vec<(ContextId, Option<FetchedView>, Option<FetchedView>)> =
            Vec::with_capacity(ids.len());
        for id in &ids {
            let (view_a, view_b) = tokio::join!(
                self.fetch_side(&self.system_a, id),
                self.fetch_side(&self.system_b, id),
            );
            fetched.push((id.clone(), view_a, view_b));
        }

        self.set_phase(PassPhase::Merging);
        let mut merged_items: Vec<MergedItem> = Vec::new();
        let mut conflict_reports: Vec<(ContextId, ConflictReport)> = Vec::new();
        let mut skipped = 0usize;
        for (id, view_a, view_b) in fetched {
            if view_a.is_none() && view_b.is_none() {
                skipped += 1;
                continue;
            }
            let base = match self.store.get_current(&id) {
                Ok(context) => Some(context),
                Err(crate::error::StorageError::ContextNotFound(_)) => None,
                Err(err) => return Err(SyncError::Storage(err)),
            };
            let (payload, report) = merge(
                base.as_ref().map(|c| &c.payload),
                view_a.as_ref(),
                view_b.as_ref(),
                &self.authority,
            );

            if report.missing_side.is_some() {
                self.counters.partial_fetches.fetch_add(1, Ordering::Relaxed);
            }
            self.counters
                .conflicts_resolved
                .fetch_add(report.decisions.len() as u64, Ordering::Relaxed);

            // Identical merged payload: nothing to commit this pass.
            if base
                .as_ref()
                .is_some_and(|c| c.payload.fingerprint() == payload.fingerprint())
            {
                skipped += 1;
                conflict_reports.push((id, report));
                continue;
            }
            conflict_reports.push((id.clone(), report));
            merged_items.push(MergedItem { id, payload });
        }

        self.set_phase(PassPhase::Committing);
        let mut committed: Vec<(ContextId, u64, Payload)> = Vec::new();
        for item in merged_items {
            match self
                .store
                .commit(&item.id, &item.payload, SourceSystem::Merged)
            {
                Ok(version) => {
                    self.cache.invalidate(item.id.as_str()).await;
                    committed.push((item.id, version, item.payload));
                }
                Err(err) => {
                    error!(context_id = %item.id, error = %err, "commit failed, rolling back pass");
                    let reason = SyncError::CommitFailed(err).to_string();
                    return self
                        .roll_back(snapshot, reason, started_at, pass_start)
                        .await;
                }
            }
        }

        // Committed payloads become immediately readable at every tier.
        for (id, _, payload) in &committed {
            self.cache
                .set(id.as_str(), &payload.canonical_bytes(), CacheTier::L3)
                .await;
        }

        self.set_phase(PassPhase::Indexing);
        for (id, version, payload) in &committed {
            self.indexer.enqueue(id, *version, payload).await;
        }
        let index_result = self.indexer.process_pending().await;

        self.set_phase(PassPhase::Idle);
        let duration_millis = pass_start.elapsed().as_millis() as u64;
        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .committed
            .fetch_add(committed.len() as u64, Ordering::Relaxed);
        self.counters
            .last_pass_millis
            .store(duration_millis, Ordering::Relaxed);

        let outcome = match index_result {
            Ok(_) => {
                info!(
                    contexts = committed.len(),
                    skipped, duration_millis, "sync pass committed"
                );
                PassOutcome::Committed {
                    contexts_committed: committed.len(),
                    skipped,
                }
            }
            Err(err) => {
                warn!(error = %err, "indexing incomplete, entries queued for next pass");
                self.counters.index_retries.fetch_add(1, Ordering::Relaxed);
                PassOutcome::PartialIndexFailure {
                    contexts_committed: committed.len(),
                    pending_index: self.indexer.pending_len().await,
                }
            }
        };

        self.publish_metrics().await;
        Ok(SyncReport {
            outcome,
            conflict_reports,
            started_at,
            duration_millis,
        })
    }

    async fn roll_back(
        &self,
        snapshot: crate::types::SyncSnapshot,
        reason: String,
        started_at: DateTime<Utc>,
        pass_start: Instant,
    ) -> Result<SyncReport, SyncError> {
        self.set_phase(PassPhase::RollingBack);
        if let Err(restore_err) = self.store.restore_snapshot(&snapshot) {
            self.set_phase(PassPhase::Idle);
            return Err(SyncError::RollbackFailed(restore_err));
        }
        for id in snapshot.context_ids() {
            self.cache.invalidate(id.as_str()).await;
        }

        self.set_phase(PassPhase::Idle);
        let duration_millis = pass_start.elapsed().as_millis() as u64;
        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_pass_millis
            .store(duration_millis, Ordering::Relaxed);
        self.publish_metrics().await;

        Ok(SyncReport {
            outcome: PassOutcome::RolledBack { reason },
            conflict_reports: Vec::new(),
            started_at,
            duration_millis,
        })
    }

    /// Fetch one side with the configured timeout. Any failure or timeout
    /// means "no update this pass" for that side.
    async fn fetch_side(
        &self,
        system: &Arc<dyn ExternalSystem>,
        id: &ContextId,
    ) -> Option<FetchedView> {
        match timeout(self.config.fetch_timeout(), system.fetch_current(id)).await {
            Ok(Ok(view)) => view,
            Ok(Err(err)) => {
                warn!(context_id = %id, source = system.source().label(), error = %err, "fetch failed");
                None
            }
            Err(_) => {
                warn!(context_id = %id, source = system.source().label(), "fetch timed out");
                None
            }
        }
    }

    async fn publish_metrics(&self) {
        let snapshot = MetricsSnapshot {
            store: self.store.metrics(),
            cache: self.cache.metrics().await,
            sync: self.counters.snapshot(),
        };
        self.sink.publish(&snapshot);
    }

    /// Spawn the periodic tick task. Passes run sequentially inside the
    /// task; a pass longer than the interval delays the next tick rather
    /// than overlapping it.
    pub fn spawn_periodic(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = engine.config.interval_secs, "sync engine tick started");
            loop {
                tokio::select! {
                    _ = engine.shutdown.notified() => {
                        info!("sync engine tick stopped");
                        break;
                    }
                    _ = sleep(engine.config.interval()) => {
                        let ids = engine.tracked();
                        if ids.is_empty() {
                            continue;
                        }
                        match engine.run_pass(ids).await {
                            Ok(report) => {
                                debug!(outcome = ?report.outcome, "periodic pass finished")
                            }
                            Err(err) => error!(error = %err, "periodic pass failed"),
                        }
                    }
                }
            }
        })
    }

    /// Stop the periodic tick. In-flight passes finish normally.
    pub fn stop(&self) {
        // notify_one stores a permit, so a stop issued between ticks still
        // lands.
        self.shutdown.notify_one();
    }
}
