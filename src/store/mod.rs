//! Version Store
//!
//! Durable, append-only ledger of context versions backed by sled. Owns the
//! retention policy and the snapshot/rollback mechanism used by the sync
//! engine. Version assignment is linearizable per context: commits take a
//! per-context lock and swap the current-pointer row with compare-and-swap,
//! so the version counter can never diverge from durable state.

pub mod persistence;
mod snapshot;

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::telemetry::StoreMetrics;
use crate::types::{diff_summary, Context, ContextId, ContextVersion, Payload, SourceSystem};
use chrono::Utc;
use parking_lot::Mutex;
use persistence::{
    context_key, decode_context, decode_version, encode_context, encode_version, version_key,
    version_prefix, CONTEXTS_TREE, VERSIONS_TREE,
};
use sled::IVec;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-context commit locks.
///
/// Serializes commits (and retention pruning, which runs under the same
/// lock) for one context id while leaving other contexts untouched.
struct CommitLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CommitLocks {
    fn new() -> Self {
        CommitLocks {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, id: &ContextId) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        map.entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Sled-backed version store.
pub struct VersionStore {
    db: sled::Db,
    contexts: sled::Tree,
    versions: sled::Tree,
    commit_locks: CommitLocks,
    config: StoreConfig,
}

impl VersionStore {
    /// Open (or create) a version store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::with_db(db, config)
    }

    /// Build a version store over an already-open sled database.
    pub fn with_db(db: sled::Db, mut config: StoreConfig) -> Result<Self, StorageError> {
        // Rollback rebuilds the current pointer from the pre-pass version
        // row, so at least that row and its successor must survive pruning.
        config.retention_limit = config.retention_limit.max(2);
        let contexts = db.open_tree(CONTEXTS_TREE)?;
        let versions = db.open_tree(VERSIONS_TREE)?;
        Ok(VersionStore {
            db,
            contexts,
            versions,
            commit_locks: CommitLocks::new(),
            config,
        })
    }

    /// The underlying sled database, shared with the durable cache tier.
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Commit a new version, creating the context on first write.
    ///
    /// Returns the assigned version number. Fails with `PayloadTooLarge`
    /// before any mutation if the payload exceeds the configured cap.
    pub fn commit(
        &self,
        id: &ContextId,
        payload: &Payload,
        source: SourceSystem,
    ) -> Result<u64, StorageError> {
        self.commit_inner(id, payload, source, true)
    }

    /// Commit against an existing context only; unknown ids fail with
    /// `ContextNotFound`.
    pub fn commit_existing(
        &self,
        id: &ContextId,
        payload: &Payload,
        source: SourceSystem,
    ) -> Result<u64, StorageError> {
        self.commit_inner(id, payload, source, false)
    }

    fn commit_inner(
        &self,
        id: &ContextId,
        payload: &Payload,
        source: SourceSystem,
        create: bool,
    ) -> Result<u64, StorageError> {
        let payload_bytes = payload.canonical_bytes();
        if payload_bytes.len() > self.config.max_payload_bytes {
            return Err(StorageError::PayloadTooLarge {
                size: payload_bytes.len(),
                cap: self.config.max_payload_bytes,
            });
        }

        let lock = self.commit_locks.lock_for(id);
        let _guard = lock.lock();

        // One internal retry with a fresh read on a CAS race (an external
        // writer sharing the database), then the conflict is surfaced.
        let mut attempts = 0;
        loop {
            attempts += 1;

            let prev = self.read_context_raw(id)?;
            if prev.is_none() && !create {
                return Err(StorageError::ContextNotFound(id.clone()));
            }
            let prev_context = prev.as_ref().map(|(context, _)| context);
            let next_version = prev_context.map_or(1, |c| c.current_version + 1);
            let created_at = Utc::now();

            let mut metadata = HashMap::new();
            metadata.insert(
                "diff".to_string(),
                diff_summary(prev_context.map(|c| &c.payload), payload),
            );
            metadata.insert(
                "fingerprint".to_string(),
                hex::encode(blake3::hash(&payload_bytes).as_bytes()),
            );
            metadata.insert("source".to_string(), source.label().to_string());

            let row = ContextVersion {
                context_id: id.clone(),
                version_number: next_version,
                payload: payload.clone(),
                source_system: source,
                created_at,
                metadata,
            };
            self.versions
                .insert(version_key(id, next_version), encode_version(&row)?)?;

            let next_context = Context {
                id: id.clone(),
                current_version: next_version,
                payload: payload.clone(),
                source_system: source,
                updated_at: created_at,
            };
            let old_bytes = prev.as_ref().map(|(_, bytes)| bytes.clone());
            let cas = self.contexts.compare_and_swap(
                context_key(id),
                old_bytes,
                Some(encode_context(&next_context)?),
            )?;

            match cas {
                Ok(()) => {
                    self.prune_history(id)?;
                    debug!(
                        context_id = %id,
                        version = next_version,
                        source = source.label(),
                        "committed context version"
                    );
                    return Ok(next_version);
                }
                Err(cas_err) => {
                    // Undo the speculative history row before retrying.
                    self.versions.remove(version_key(id, next_version))?;
                    if attempts == 1 {
                        warn!(context_id = %id, "commit pointer moved, retrying with fresh read");
                        continue;
                    }
                    let found = cas_err
                        .current
                        .as_deref()
                        .map(decode_context)
                        .transpose()?
                        .map_or(0, |c| c.current_version);
                    return Err(StorageError::CommitConflict {
                        context_id: id.clone(),
                        expected: next_version.saturating_sub(1),
                        found,
                    });
                }
            }
        }
    }

    /// Remove the oldest history rows beyond the retention cap.
    ///
    /// Runs inside the same per-context lock as commits, so a concurrent
    /// sync pass can never observe a half-pruned history.
    fn prune_history(&self, id: &ContextId) -> Result<(), StorageError> {
        let prefix = version_prefix(id);
        let count = self.versions.scan_prefix(&prefix).count();
        if count <= self.config.retention_limit {
            return Ok(());
        }
        let excess = count - self.config.retention_limit;
        let oldest: Vec<IVec> = self
            .versions
            .scan_prefix(&prefix)
            .keys()
            .take(excess)
            .collect::<Result<_, _>>()?;
        for key in oldest {
            self.versions.remove(key)?;
        }
        debug!(context_id = %id, pruned = excess, "pruned version history");
        Ok(())
    }

    /// Latest committed view of a context.
    pub fn get_current(&self, id: &ContextId) -> Result<Context, StorageError> {
        self.read_context(id)?
            .ok_or_else(|| StorageError::ContextNotFound(id.clone()))
    }

    pub fn contains(&self, id: &ContextId) -> Result<bool, StorageError> {
        Ok(self.contexts.contains_key(context_key(id))?)
    }

    /// One immutable historical record.
    pub fn get_version(
        &self,
        id: &ContextId,
        version: u64,
    ) -> Result<ContextVersion, StorageError> {
        match self.versions.get(version_key(id, version))? {
            Some(bytes) => decode_version(&bytes),
            None => {
                if self.contains(id)? {
                    Err(StorageError::VersionNotFound {
                        context_id: id.clone(),
                        version,
                    })
                } else {
                    Err(StorageError::ContextNotFound(id.clone()))
                }
            }
        }
    }

    /// History for a context, newest first.
    ///
    /// `before_version` restarts pagination: only versions strictly below
    /// the cursor are returned.
    pub fn list_versions(
        &self,
        id: &ContextId,
        limit: usize,
        before_version: Option<u64>,
    ) -> Result<Vec<ContextVersion>, StorageError> {
        if !self.contains(id)? {
            return Err(StorageError::ContextNotFound(id.clone()));
        }
        let prefix = version_prefix(id);
        let mut out = Vec::with_capacity(limit.min(64));
        for item in self.versions.scan_prefix(&prefix).rev() {
            let (_, bytes) = item?;
            let row = decode_version(&bytes)?;
            if let Some(cursor) = before_version {
                if row.version_number >= cursor {
                    continue;
                }
            }
            out.push(row);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Size counters for the metrics surface.
    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            contexts: self.contexts.len() as u64,
            versions: self.versions.len() as u64,
        }
    }

    fn read_context(&self, id: &ContextId) -> Result<Option<Context>, StorageError> {
        Ok(self
            .read_context_raw(id)?
            .map(|(context, _)| context))
    }

    fn read_context_raw(&self, id: &ContextId) -> Result<Option<(Context, IVec)>, StorageError> {
        match self.contexts.get(context_key(id))? {
            Some(bytes) => {
                let context = decode_context(&bytes)?;
                Ok(Some((context, bytes)))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn commit_lock(&self, id: &ContextId) -> Arc<Mutex<()>> {
        self.commit_locks.lock_for(id)
    }
}
