//! Append-only failure log.
//!
//! Each failure becomes one object `log-<uuid>.txt` in the error namespace.
//! Records are never read back by the service; operators inspect the
//! namespace directly. Recording never fails the caller: if the write itself
//! fails, the failure is logged and swallowed.

use std::sync::Arc;

use crate::models::ErrorRecord;
use crate::store::ObjectStore;

#[derive(Clone)]
pub struct ErrorSink {
    store: Arc<dyn ObjectStore>,
}

impl ErrorSink {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Persist `message` as a new record and return it.
    pub async fn record(&self, message: impl Into<String>) -> ErrorRecord {
        let record = ErrorRecord::new(message);
        let key = record.key();
        match self.store.put(&key, record.message.as_bytes()).await {
            Ok(()) => tracing::info!(key = %key, "saved error log"),
            Err(e) => tracing::error!(
                key = %key,
                error = %format!("{:#}", e),
                message = %record.message,
                "failed to save error log"
            ),
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryObjectStore;
    use anyhow::Result;
    use async_trait::async_trait;

    #[tokio::test]
    async fn each_record_is_a_new_object() {
        let store = Arc::new(InMemoryObjectStore::new());
        let sink = ErrorSink::new(store.clone());

        let a = sink.record("first failure").await;
        let b = sink.record("first failure").await;
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);

        let body = store.get(&a.key()).await.unwrap().unwrap();
        assert_eq!(body, b"first failure");
        assert!(a.key().starts_with("log-") && a.key().ends_with(".txt"));
    }

    struct BrokenStore;

    #[async_trait]
    impl ObjectStore for BrokenStore {
        async fn list(&self, _prefix: &str) -> Result<Vec<crate::store::ObjectMeta>> {
            anyhow::bail!("offline")
        }
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            anyhow::bail!("offline")
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            anyhow::bail!("offline")
        }
        async fn put(&self, _key: &str, _body: &[u8]) -> Result<()> {
            anyhow::bail!("offline")
        }
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let sink = ErrorSink::new(Arc::new(BrokenStore));
        let record = sink.record("lost").await;
        assert_eq!(record.message, "lost");
    }
}
