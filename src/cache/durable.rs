//! L3 tier: durable-backed, largest, slowest.
//!
//! Entries live in a dedicated sled tree with their absolute expiry recorded
//! alongside the value, so TTLs survive process restarts. Expired entries
//! are dropped lazily on read.

use crate::cache::tier::{TierError, TierStore};
use crate::telemetry::now_millis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CACHE_TREE: &str = "cache_l3";

#[derive(Serialize, Deserialize)]
struct DurableEntry {
    expires_at_millis: u64,
    value: Vec<u8>,
}

/// Sled-backed cache tier.
pub struct SledTier {
    tree: sled::Tree,
}

impl SledTier {
    /// Open the cache tree on an existing sled database (typically the one
    /// backing the version store).
    pub fn new(db: &sled::Db) -> Result<Self, TierError> {
        let tree = db
            .open_tree(CACHE_TREE)
            .map_err(|e| TierError(e.to_string()))?;
        Ok(SledTier { tree })
    }
}

#[async_trait]
impl TierStore for SledTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TierError> {
        let bytes = match self
            .tree
            .get(key.as_bytes())
            .map_err(|e| TierError(e.to_string()))?
        {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let entry: DurableEntry =
            bincode::deserialize(&bytes).map_err(|e| TierError(e.to_string()))?;
        if entry.expires_at_millis <= now_millis() {
            self.tree
                .remove(key.as_bytes())
                .map_err(|e| TierError(e.to_string()))?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), TierError> {
        let entry = DurableEntry {
            expires_at_millis: now_millis().saturating_add(ttl.as_millis() as u64),
            value,
        };
        let bytes = bincode::serialize(&entry).map_err(|e| TierError(e.to_string()))?;
        self.tree
            .insert(key.as_bytes(), bytes)
            .map_err(|e| TierError(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), TierError> {
        self.tree
            .remove(key.as_bytes())
            .map_err(|e| TierError(e.to_string()))?;
        Ok(())
    }

    async fn entry_count(&self) -> Result<usize, TierError> {
        Ok(self.tree.len())
    }

    async fn flush(&self) -> Result<(), TierError> {
        self.tree
            .flush_async()
            .await
            .map_err(|e| TierError(e.to_string()))?;
        Ok(())
    }
}
