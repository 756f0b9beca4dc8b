//! Core types for contexts, versions, and snapshots.
//!
//! A context is a named, versioned blob of shared state produced by multiple
//! independent systems. These types are owned by the version store; the cache
//! and sync engine only ever see committed values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static SNAPSHOT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque context identifier. Caller-assigned or generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        ContextId(id.into())
    }

    /// Generate a unique context id.
    pub fn generate() -> Self {
        let ts = crate::telemetry::now_millis();
        let pid = std::process::id();
        let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        ContextId(format!("ctx-{ts}-{pid}-{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        ContextId(s.to_string())
    }
}

/// Provenance of a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    SystemA,
    SystemB,
    Merged,
}

impl SourceSystem {
    pub fn label(&self) -> &'static str {
        match self {
            SourceSystem::SystemA => "system_a",
            SourceSystem::SystemB => "system_b",
            SourceSystem::Merged => "merged",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured context payload.
///
/// Wraps a JSON value. Size validation happens at commit time against the
/// configured cap; oversize payloads are rejected, never truncated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    pub fn new(value: Value) -> Self {
        Payload(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Top-level fields, if the payload is a JSON object.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    /// Canonical JSON encoding. serde_json orders object keys, so identical
    /// values always encode to identical bytes. JSON values carry string keys
    /// only, so encoding cannot fail in practice.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes).map(Payload)
    }

    /// Blake3 hash of the canonical encoding, hex-encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(blake3::hash(&self.canonical_bytes()).as_bytes())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload(value)
    }
}

/// Latest committed view of a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: ContextId,
    pub current_version: u64,
    pub payload: Payload,
    pub source_system: SourceSystem,
    pub updated_at: DateTime<Utc>,
}

/// Immutable historical record of one committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextVersion {
    pub context_id: ContextId,
    pub version_number: u64,
    pub payload: Payload,
    pub source_system: SourceSystem,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Cache hierarchy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheTier {
    L1,
    L2,
    L3,
}

impl CacheTier {
    pub fn label(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::L3 => "l3",
        }
    }
}

/// Pre-pass state for one context, recorded before a sync pass mutates it.
///
/// `current_version` is `None` when the context did not exist at snapshot
/// time; restore then removes the context entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub context_id: ContextId,
    pub current_version: Option<u64>,
}

/// Rollback point created before each sync pass.
///
/// Owned exclusively by the sync pass that created it: dropped on success,
/// replayed through the version store on failure, never persisted.
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    pub id: String,
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

impl SyncSnapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        let seq = SNAPSHOT_COUNTER.fetch_add(1, Ordering::Relaxed);
        SyncSnapshot {
            id: format!("snap-{}-{}", crate::telemetry::now_millis(), seq),
            taken_at: Utc::now(),
            entries,
        }
    }

    pub fn context_ids(&self) -> impl Iterator<Item = &ContextId> {
        self.entries.iter().map(|e| &e.context_id)
    }
}

/// Summarize top-level field changes between two payloads.
///
/// Recorded in version metadata so `list_versions` carries a readable change
/// trail. Non-object payloads are summarized as a whole-value replacement.
pub fn diff_summary(prev: Option<&Payload>, next: &Payload) -> String {
    let prev_fields = prev.and_then(|p| p.fields());
    let next_fields = next.fields();

    match (prev_fields, next_fields) {
        (Some(before), Some(after)) => {
            let mut added = 0u64;
            let mut removed = 0u64;
            let mut changed = 0u64;
            for (key, value) in after {
                match before.get(key) {
                    None => added += 1,
                    Some(old) if old != value => changed += 1,
                    Some(_) => {}
                }
            }
            for key in before.keys() {
                if !after.contains_key(key) {
                    removed += 1;
                }
            }
            format!("added={added} removed={removed} changed={changed}")
        }
        (None, _) => "initial".to_string(),
        _ => "replaced".to_string(),
    }
}
