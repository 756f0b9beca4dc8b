//! Per-context async locks for sync passes.
//!
//! A pass locks every context it will touch, in sorted id order, before
//! snapshotting. Passes over overlapping context sets therefore serialize;
//! passes over disjoint sets run concurrently.

use crate::types::ContextId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct LockRegistry {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire locks for a set of contexts.
    ///
    /// Ids are sorted and deduplicated before locking, so two passes over
    /// overlapping sets always request locks in the same order and cannot
    /// deadlock against each other.
    pub async fn acquire_set(&self, ids: &[ContextId]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<&ContextId> = ids.iter().collect();
        sorted.sort();
        sorted.dedup();

        let handles: Vec<Arc<AsyncMutex<()>>> = {
            let mut map = self.inner.lock();
            sorted
                .iter()
                .map(|id| {
                    map.entry(id.as_str().to_string())
                        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                        .clone()
                })
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        guards
    }
}
