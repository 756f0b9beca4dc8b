//! Snapshot and rollback support for the sync engine.
//!
//! A snapshot records each touched context's pre-pass current version.
//! Restore is a compensating action: it removes every history row the failed
//! pass appended and rewinds the current pointer, leaving the store exactly
//! as the snapshot observed it. Crate-visible only; rollback is never
//! exposed to ordinary callers.

use crate::error::StorageError;
use crate::store::persistence::{context_key, encode_context, version_key, version_prefix};
use crate::store::VersionStore;
use crate::types::{Context, SnapshotEntry, SyncSnapshot};
use sled::IVec;
use tracing::{info, warn};

impl VersionStore {
    /// Record the pre-pass state of the given contexts.
    pub(crate) fn create_snapshot(
        &self,
        ids: &[crate::types::ContextId],
    ) -> Result<SyncSnapshot, StorageError> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            let current_version = match self.get_current(id) {
                Ok(context) => Some(context.current_version),
                Err(StorageError::ContextNotFound(_)) => None,
                Err(other) => return Err(other),
            };
            entries.push(SnapshotEntry {
                context_id: id.clone(),
                current_version,
            });
        }
        Ok(SyncSnapshot::new(entries))
    }

    /// Rewind every context in the snapshot to its pre-pass state.
    pub(crate) fn restore_snapshot(&self, snapshot: &SyncSnapshot) -> Result<(), StorageError> {
        for entry in &snapshot.entries {
            let lock = self.commit_lock(&entry.context_id);
            let _guard = lock.lock();

            match entry.current_version {
                Some(version) => self.rewind_to(entry, version)?,
                None => self.remove_context(entry)?,
            }
        }
        info!(snapshot_id = %snapshot.id, contexts = snapshot.entries.len(), "restored sync snapshot");
        Ok(())
    }

    fn rewind_to(&self, entry: &SnapshotEntry, version: u64) -> Result<(), StorageError> {
        let id = &entry.context_id;

        // Drop every row the failed pass appended.
        let cutoff = version_key(id, version);
        let appended: Vec<IVec> = self
            .versions
            .scan_prefix(version_prefix(id))
            .keys()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|key| key.as_ref() > cutoff.as_slice())
            .collect();
        for key in appended {
            self.versions.remove(key)?;
        }

        // Rebuild the current pointer from the surviving history row.
        let row = self.get_version(id, version)?;
        let restored = Context {
            id: id.clone(),
            current_version: version,
            payload: row.payload,
            source_system: row.source_system,
            updated_at: row.created_at,
        };
        self.contexts
            .insert(context_key(id), encode_context(&restored)?)?;
        Ok(())
    }

    fn remove_context(&self, entry: &SnapshotEntry) -> Result<(), StorageError> {
        let id = &entry.context_id;
        let keys: Vec<IVec> = self
            .versions
            .scan_prefix(version_prefix(id))
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in keys {
            self.versions.remove(key)?;
        }
        if self.contexts.remove(context_key(id))?.is_some() {
            warn!(context_id = %id, "removed context created by failed sync pass");
        }
        Ok(())
    }
}
