//! Hit-rate accounting for the tier cache.

use crate::types::CacheTier;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,
}

impl TierCounters {
    pub(crate) fn record_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::L1 => &self.l1_hits,
            CacheTier::L2 => &self.l2_hits,
            CacheTier::L3 => &self.l3_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, sizes: [usize; 3]) -> CacheMetrics {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l3_hits = self.l3_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = l1_hits + l2_hits + l3_hits + misses;

        let rate = |hits: u64| {
            if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            }
        };

        CacheMetrics {
            l1_hits,
            l2_hits,
            l3_hits,
            misses,
            l1_hit_rate: rate(l1_hits),
            l2_hit_rate: rate(l2_hits),
            l3_hit_rate: rate(l3_hits),
            overall_hit_rate: rate(l1_hits + l2_hits + l3_hits),
            l1_size: sizes[0],
            l2_size: sizes[1],
            l3_size: sizes[2],
        }
    }
}

/// Point-in-time cache metrics. Per-tier rates are hits at that tier over
/// total lookups; the overall rate is any-tier hits over total lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
    pub l3_hit_rate: f64,
    pub overall_hit_rate: f64,
    pub l1_size: usize,
    pub l2_size: usize,
    pub l3_size: usize,
}
