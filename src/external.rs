//! External producer system abstraction.
//!
//! The sync engine is a pure consumer of System A and System B. An
//! unreachable system is "no update this pass", never a fatal error.

use crate::types::{ContextId, Payload, SourceSystem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by an external producer system.
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("External system unavailable: {0}")]
    Unavailable(String),

    #[error("External system returned malformed data: {0}")]
    Malformed(String),
}

/// One system's current view of a context, as fetched during a sync pass.
#[derive(Debug, Clone)]
pub struct FetchedView {
    pub payload: Payload,
    /// The producer's own version counter, when it exposes one.
    pub source_version: Option<u64>,
    pub fetched_at: DateTime<Utc>,
    pub source: SourceSystem,
}

/// A context-producing system the engine synchronizes against.
///
/// Implementations wrap whatever transport the deployment uses; the engine
/// only requires `fetch_current` with a bounded caller-side timeout.
#[async_trait]
pub trait ExternalSystem: Send + Sync {
    /// Which side of the merge this system represents.
    fn source(&self) -> SourceSystem;

    /// Fetch the system's current view of a context.
    ///
    /// `Ok(None)` means the system has no view of this context (not an
    /// error). Transport failures return `Err` and are treated by the sync
    /// engine as "no update this pass".
    async fn fetch_current(
        &self,
        context_id: &ContextId,
    ) -> Result<Option<FetchedView>, ExternalError>;
}
