//! In-memory [`ObjectStore`] implementation for tests and ephemeral runs.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`, so listings come back in
//! key order like the other backends.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{ObjectMeta, ObjectStore};

/// In-memory object store.
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory object store lock poisoned")
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(poisoned)?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, body)| ObjectMeta {
                key: key.clone(),
                size: body.len() as u64,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.read().map_err(poisoned)?;
        Ok(objects.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let objects = self.objects.read().map_err(poisoned)?;
        Ok(objects.contains_key(key))
    }

    async fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        let mut objects = self.objects.write().map_err(poisoned)?;
        objects.insert(key.to_string(), body.to_vec());
        Ok(())
    }
}
