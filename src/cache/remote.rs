//! L2 tier: shared across processes, network-attached, best-effort.
//!
//! The distributed cache client is a deployment concern; any `TierStore`
//! implementation can be injected as L2. `MemoryTier` stands in for it in
//! tests and single-process deployments.

use crate::cache::tier::{TierError, TierStore, TtlMap};
use async_trait::async_trait;
use std::time::Duration;

/// In-memory stand-in for the distributed cache service.
pub struct MemoryTier {
    inner: TtlMap,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        MemoryTier {
            inner: TtlMap::new(capacity),
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        MemoryTier::new(65_536)
    }
}

#[async_trait]
impl TierStore for MemoryTier {
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
