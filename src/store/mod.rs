//! Object-store abstraction for tutorial artifacts and error logs.
//!
//! The [`ObjectStore`] trait models a flat, prefix-addressed blob namespace.
//! Keys are opaque strings: no backend may resolve `..` or other directory
//! semantics that would let a key escape its namespace.
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | In-memory | [`memory`] | tests, ephemeral runs |
//! | Filesystem | [`fs`] | single-host deployments |
//! | S3 | [`s3`] | S3 / S3-compatible buckets |
//!
//! Implementations must be `Send + Sync` to be shared across handlers and
//! worker tasks.

pub mod fs;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::Config;

/// Listing entry for a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full key within the namespace.
    pub key: String,
    pub size: u64,
}

/// Abstract blob namespace.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list`](ObjectStore::list) | All objects whose key starts with a prefix |
/// | [`get`](ObjectStore::get) | Full object body, `None` when absent |
/// | [`exists`](ObjectStore::exists) | Presence check without reading the body |
/// | [`put`](ObjectStore::put) | Create or overwrite an object |
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Create or overwrite. Concurrent writers to one key: last write wins.
    async fn put(&self, key: &str, body: &[u8]) -> Result<()>;
}

/// Open the configured backend for one logical namespace
/// (e.g. `"tutorials"` or `"errors"`).
pub fn open_store(config: &Config, namespace: &str) -> Result<Arc<dyn ObjectStore>> {
    let storage = &config.storage;
    match storage.backend.as_str() {
        "memory" => Ok(Arc::new(memory::InMemoryObjectStore::new())),
        "filesystem" => Ok(Arc::new(fs::FsObjectStore::new(
            storage.root.join(namespace),
        )?)),
        "s3" => {
            let Some(s3_config) = storage.s3.clone() else {
                bail!("storage.s3 must be configured when backend is 's3'");
            };
            Ok(Arc::new(s3::S3ObjectStore::from_env(s3_config, namespace)?))
        }
        other => bail!("Unknown storage backend: '{}'", other),
    }
}
