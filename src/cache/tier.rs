//! Cache tier store abstraction and the process-local L1 tier.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;

/// A tier that failed to answer. Always recovered by degrading to the next
/// tier; never surfaced to callers.
#[derive(Debug, Error)]
#[error("Cache tier unavailable: {0}")]
pub struct TierError(pub String);

/// One level of the cache hierarchy.
///
/// Implementations are best-effort: the orchestrator treats any `Err` as a
/// miss at that tier. L2 implementations wrap whatever distributed cache
/// client the deployment provides.
#[async_trait]
pub trait TierStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TierError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), TierError>;

    async fn remove(&self, key: &str) -> Result<(), TierError>;

    /// Number of live entries, for the metrics surface.
    async fn entry_count(&self) -> Result<usize, TierError>;

    /// Shutdown drain hook. Memory-backed tiers have nothing to persist.
    async fn flush(&self) -> Result<(), TierError> {
        Ok(())
    }
}

struct TtlEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Bounded in-memory TTL map shared by the L1 tier and the in-memory L2
/// stand-in. FIFO eviction once capacity is exceeded; expired entries are
/// dropped lazily on read and on insert.
pub(crate) struct TtlMap {
    entries: RwLock<TtlMapInner>,
    capacity: usize,
}

struct TtlMapInner {
    map: HashMap<String, TtlEntry>,
    insertion_order: VecDeque<String>,
}

impl TtlMap {
    pub(crate) fn new(capacity: usize) -> Self {
        TtlMap {
            entries: RwLock::new(TtlMapInner {
                map: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Vec<u8>> {
        {
            let inner = self.entries.read();
            match inner.map.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: upgrade to a write lock and drop it.
        let mut inner = self.entries.write();
        if inner
            .map
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            inner.map.remove(key);
        }
        None
    }

    pub(crate) fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut inner = self.entries.write();
        let now = Instant::now();
        inner.map.retain(|_, entry| entry.expires_at > now);
        if !inner.map.contains_key(key) {
            inner.insertion_order.push_back(key.to_string());
        }
        inner.map.insert(
            key.to_string(),
            TtlEntry {
                value,
                expires_at: now + ttl,
            },
        );
        while inner.map.len() > self.capacity {
            match inner.insertion_order.pop_front() {
                Some(evict) => {
                    inner.map.remove(&evict);
                }
                None => break,
            }
        }
        // Drop queue entries whose key was already evicted or replaced.
        let map = &inner.map;
        let live: VecDeque<String> = inner
            .insertion_order
            .iter()
            .filter(|key| map.contains_key(key.as_str()))
            .cloned()
            .collect();
        inner.insertion_order = live;
    }

    pub(crate) fn remove(&self, key: &str) {
        let mut inner = self.entries.write();
        inner.map.remove(key);
        inner.insertion_order.retain(|k| k != key);
    }

    pub(crate) fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

/// Process-local L1 tier: fastest, smallest, no network round-trip.
pub struct LocalTier {
    inner: TtlMap,
}

impl LocalTier {
    pub fn new(capacity: usize) -> Self {
        LocalTier {
            inner: TtlMap::new(capacity),
        }
    }
}

#[async_trait]
impl TierStore for LocalTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        Ok(self.inner.get(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), TierError> {
        self.inner.set(key, value, ttl);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), TierError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn entry_count(&self) -> Result<usize, TierError> {
        Ok(self.inner.len())
    }
}
