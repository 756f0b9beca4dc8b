//! Tier Cache
//!
//! Three-level cache with promotion on read and write-through toward faster
//! tiers on set. L1 is process-local, L2 is the injected distributed cache,
//! L3 is durable-backed. An unreachable tier degrades to the next one
//! transparently; cache availability never propagates as an error.
//!
//! Promotion on read keeps L1 populated with genuinely hot data without a
//! background job; write-through-upward makes a freshly synchronized context
//! available at the fastest tier before any organic cache-fill read.

pub mod durable;
pub mod metrics;
pub mod remote;
pub mod tier;

pub use durable::SledTier;
pub use metrics::CacheMetrics;
pub use remote::MemoryTier;
pub use tier::{LocalTier, TierError, TierStore};

use crate::config::CacheConfig;
use crate::types::CacheTier;
use futures::future::join_all;
use metrics::TierCounters;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Three-tier cache orchestrator.
pub struct TierCache {
    tiers: [Arc<dyn TierStore>; 3],
    ttls: [Duration; 3],
    counters: TierCounters,
}

impl TierCache {
    pub fn new(
        l1: Arc<dyn TierStore>,
        l2: Arc<dyn TierStore>,
        l3: Arc<dyn TierStore>,
        ttls: [Duration; 3],
    ) -> Self {
        TierCache {
            tiers: [l1, l2, l3],
            ttls,
            counters: TierCounters::default(),
        }
    }

    /// Standard wiring: process-local L1, injected L2, sled-backed L3.
    pub fn standard(
        config: &CacheConfig,
        l2: Arc<dyn TierStore>,
        db: &sled::Db,
    ) -> Result<Self, TierError> {
        let l1 = Arc::new(LocalTier::new(config.l1_capacity));
        let l3 = Arc::new(SledTier::new(db)?);
        Ok(Self::new(l1, l2, l3, config.ttls()))
    }

    /// Probe L1 → L2 → L3, promoting a hit into all faster tiers.
    ///
    /// Returns `None` on a full miss; the caller loads from the version
    /// store and repopulates via [`TierCache::set`].
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.get(key).await {
                Ok(Some(value)) => {
                    let hit_tier = tier_at(index);
                    self.counters.record_hit(hit_tier);
                    debug!(key, tier = hit_tier.label(), "cache hit");
                    self.promote(key, &value, index).await;
                    return Some(value);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(key, tier = tier_at(index).label(), error = %err, "tier unavailable, degrading");
                }
            }
        }
        self.counters.record_miss();
        None
    }

    /// Copy a hit found at `hit_index` into every faster tier.
    async fn promote(&self, key: &str, value: &[u8], hit_index: usize) {
        for faster in (0..hit_index).rev() {
            if let Err(err) = self.tiers[faster]
                .set(key, value.to_vec(), self.ttls[faster])
                .await
            {
                warn!(key, tier = tier_at(faster).label(), error = %err, "promotion skipped");
            }
        }
    }

    /// Write to the given tier and every faster tier, each with its own TTL.
    pub async fn set(&self, key: &str, value: &[u8], tier: CacheTier) {
        let deepest = match tier {
            CacheTier::L1 => 0,
            CacheTier::L2 => 1,
            CacheTier::L3 => 2,
        };
        for index in (0..=deepest).rev() {
            if let Err(err) = self.tiers[index]
                .set(key, value.to_vec(), self.ttls[index])
                .await
            {
                warn!(key, tier = tier_at(index).label(), error = %err, "set skipped on unavailable tier");
            }
        }
    }

    /// Remove a key from all three tiers. Idempotent; called on every
    /// version store commit for the affected context.
    pub async fn invalidate(&self, key: &str) {
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Err(err) = tier.remove(key).await {
                warn!(key, tier = tier_at(index).label(), error = %err, "invalidate skipped on unavailable tier");
            }
        }
    }

    /// Proactively load entries expected to be hot, bypassing the miss path.
    pub async fn warm(&self, entries: Vec<(String, Vec<u8>)>) {
        let writes = entries
            .iter()
            .map(|(key, value)| self.set(key, value, CacheTier::L3));
        join_all(writes).await;
    }

    /// Per-tier and overall hit rates plus live entry counts.
    pub async fn metrics(&self) -> CacheMetrics {
        let mut sizes = [0usize; 3];
        for (index, tier) in self.tiers.iter().enumerate() {
            sizes[index] = tier.entry_count().await.unwrap_or(0);
        }
        self.counters.snapshot(sizes)
    }

    /// Shutdown drain: flush every tier that persists state.
    pub async fn flush(&self) {
        for (index, tier) in self.tiers.iter().enumerate() {
            if let Err(err) = tier.flush().await {
                warn!(tier = tier_at(index).label(), error = %err, "flush failed");
            }
        }
    }
}

fn tier_at(index: usize) -> CacheTier {
    match index {
        0 => CacheTier::L1,
        1 => CacheTier::L2,
        _ => CacheTier::L3,
    }
}
