//! Configuration System
//!
//! Serde-backed configuration with per-field defaults, layered from an
//! optional file source plus `CTXSYNC_` environment overrides. The engine is
//! a library; config loading here covers engine tuning only, operator
//! provisioning of backing services stays external.

use crate::logging::LoggingConfig;
use crate::merge::MergeAuthority;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version store tuning
    #[serde(default)]
    pub store: StoreConfig,

    /// Cache tier TTLs and capacity
    #[serde(default)]
    pub cache: CacheConfig,

    /// Sync pass scheduling and fetch timeouts
    #[serde(default)]
    pub sync: SyncConfig,

    /// Embedding batch and retry queue limits
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Per-field merge authority assignments
    #[serde(default)]
    pub authority: MergeAuthority,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// Environment variables use the `CTXSYNC_` prefix with `__` as the
    /// nesting separator, e.g. `CTXSYNC_SYNC__INTERVAL_SECS=10`.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(Environment::with_prefix("CTXSYNC").separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// Version store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Hard cap on serialized payload size in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Versions retained per context; oldest pruned beyond this
    #[serde(default = "default_retention_limit")]
    pub retention_limit: usize,
}

fn default_max_payload_bytes() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_retention_limit() -> usize {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_payload_bytes: default_max_payload_bytes(),
            retention_limit: default_retention_limit(),
        }
    }
}

/// Cache tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// L1 (process-local) entry TTL in seconds
    #[serde(default = "default_l1_ttl_secs")]
    pub l1_ttl_secs: u64,

    /// L2 (distributed) entry TTL in seconds
    #[serde(default = "default_l2_ttl_secs")]
    pub l2_ttl_secs: u64,

    /// L3 (durable-backed) entry TTL in seconds
    #[serde(default = "default_l3_ttl_secs")]
    pub l3_ttl_secs: u64,

    /// Maximum number of L1 entries before eviction
    #[serde(default = "default_l1_capacity")]
    pub l1_capacity: usize,
}

fn default_l1_ttl_secs() -> u64 {
    300
}

fn default_l2_ttl_secs() -> u64 {
    3600
}

fn default_l3_ttl_secs() -> u64 {
    86_400
}

fn default_l1_capacity() -> usize {
    4096
}

impl CacheConfig {
    /// Per-tier TTLs ordered L1, L2, L3.
    pub fn ttls(&self) -> [Duration; 3] {
        [
            Duration::from_secs(self.l1_ttl_secs),
            Duration::from_secs(self.l2_ttl_secs),
            Duration::from_secs(self.l3_ttl_secs),
        ]
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            l1_ttl_secs: default_l1_ttl_secs(),
            l2_ttl_secs: default_l2_ttl_secs(),
            l3_ttl_secs: default_l3_ttl_secs(),
            l1_capacity: default_l1_capacity(),
        }
    }
}

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Periodic tick interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Per-side external fetch timeout in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_interval_secs() -> u64 {
    5
}

fn default_fetch_timeout_ms() -> u64 {
    2_000
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            interval_secs: default_interval_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

/// Vector indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Entries embedded per upstream request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retry queue depth; entries beyond this are dropped and counted
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_batch_size() -> usize {
    32
}

fn default_max_pending() -> usize {
    1_024
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            batch_size: default_batch_size(),
            max_pending: default_max_pending(),
        }
    }
}
