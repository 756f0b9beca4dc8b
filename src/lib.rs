//! Context Sync: Unified Context Cache and Synchronization Engine
//!
//! Maintains a shared, versioned context across two otherwise-unaware
//! producer systems, serving reads through a three-tier cache and
//! reconciling divergent views with deterministic field-level merges.
//! Commits are append-only with bounded retention; failed sync passes roll
//! back through snapshots, never leaving a partially committed state.

pub mod cache;
pub mod config;
pub mod error;
pub mod external;
pub mod indexer;
pub mod logging;
pub mod manager;
pub mod merge;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod types;
