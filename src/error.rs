//! Error types for the context cache and synchronization engine.

use crate::types::ContextId;
use thiserror::Error;

/// Version store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Context not found: {0}")]
    ContextNotFound(ContextId),

    #[error("Version {version} not found for context {context_id}")]
    VersionNotFound { context_id: ContextId, version: u64 },

    #[error("Payload is {size} bytes, exceeds cap of {cap} bytes")]
    PayloadTooLarge { size: usize, cap: usize },

    #[error("Commit conflict on {context_id}: current version moved to {found}, expected {expected}")]
    CommitConflict {
        context_id: ContextId,
        expected: u64,
        found: u64,
    },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Sync pass errors. Only commit and rollback failures are fatal to a pass;
/// unreachable external systems degrade to a partial sync instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Commit phase failed: {0}")]
    CommitFailed(#[source] StorageError),

    #[error("Rollback failed after commit failure: {0}")]
    RollbackFailed(#[source] StorageError),

    #[error("Storage error during sync: {0}")]
    Storage(#[from] StorageError),
}

/// Vector indexing errors. Never fatal to a sync pass; failed entries are
/// retried on the next pass.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Vector sink error: {0}")]
    Sink(String),

    #[error("Vector store request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Caller-facing error surface.
///
/// `get`/`store` callers see exactly this taxonomy; internal sync-pass
/// machinery and cache-tier degradation never leak through it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Commit conflict: {0}")]
    CommitConflict(String),

    #[error("Sync failure: {0}")]
    SyncFatal(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::PayloadTooLarge { .. } => EngineError::Validation(err.to_string()),
            StorageError::ContextNotFound(_) | StorageError::VersionNotFound { .. } => {
                EngineError::NotFound(err.to_string())
            }
            StorageError::CommitConflict { .. } => EngineError::CommitConflict(err.to_string()),
            other => EngineError::Storage(other),
        }
    }
}

impl From<SyncError> for EngineError {
    fn from(err: SyncError) -> Self {
        EngineError::SyncFatal(err.to_string())
    }
}
