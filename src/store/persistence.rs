//! Row encoding and key layout for the sled-backed version store.
//!
//! Two trees: `contexts` holds the current pointer row per context id,
//! `versions` holds immutable history rows under `{id}\x00{version:020}`
//! keys. Zero-padded version numbers keep lexicographic key order equal to
//! numeric version order, so prefix scans walk history oldest-first.

use crate::error::StorageError;
use crate::types::{Context, ContextId, ContextVersion};

pub const CONTEXTS_TREE: &str = "contexts";
pub const VERSIONS_TREE: &str = "versions";

const KEY_SEPARATOR: u8 = 0;

pub fn context_key(id: &ContextId) -> Vec<u8> {
    id.as_str().as_bytes().to_vec()
}

pub fn version_key(id: &ContextId, version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.as_str().len() + 21);
    key.extend_from_slice(id.as_str().as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(format!("{version:020}").as_bytes());
    key
}

pub fn version_prefix(id: &ContextId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(id.as_str().len() + 1);
    prefix.extend_from_slice(id.as_str().as_bytes());
    prefix.push(KEY_SEPARATOR);
    prefix
}

// Rows carry JSON payloads, which need a self-describing wire format.
pub fn encode_context(context: &Context) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(context)?)
}

pub fn decode_context(bytes: &[u8]) -> Result<Context, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_version(version: &ContextVersion) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(version)?)
}

pub fn decode_version(bytes: &[u8]) -> Result<ContextVersion, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}
