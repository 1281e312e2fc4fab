use std::{any::Any, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use prometheus::Registry;
use tracing::debug;

use crate::errors::StoreError;
use crate::storage::{
    codec::JsonCodec,
    file_store::{validate_key, FileStore},
    metrics::StoreMetrics,
    persistent::{Document, Entry, EntryOptions, PersistentJson},
};

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Quiet period between the first unflushed mutation and the write.
    pub debounce: Duration,
    pub pretty: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(1000), pretty: true }
    }
}

/// Lifecycle view of an open store, independent of its document type.
#[async_trait]
pub trait ManagedStore: Send + Sync {
    fn key(&self) -> &str;
    async fn is_dirty(&self) -> bool;
    /// Drain queued mutations and write immediately; disarms future timers.
    async fn close(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: Document> ManagedStore for PersistentJson<T> {
    fn key(&self) -> &str {
        PersistentJson::key(self)
    }

    async fn is_dirty(&self) -> bool {
        PersistentJson::is_dirty(self).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        PersistentJson::close(self).await
    }
}

#[derive(Clone)]
struct RegisteredStore {
    entry: Arc<dyn Any + Send + Sync>,
    managed: Arc<dyn ManagedStore>,
}

/// Owner of the backing file store and of every open entry.
///
/// Constructed once at startup and handed to whoever opens stores; opening
/// the same key twice yields two handles onto one shared entry.
pub struct StoreRegistry {
    backend: Arc<dyn FileStore>,
    options: EntryOptions,
    stores: DashMap<String, RegisteredStore>,
}

impl StoreRegistry {
    /// Create a registry whose metrics are exported through `metrics_registry`.
    pub fn new(
        backend: Arc<dyn FileStore>,
        options: StoreOptions,
        metrics_registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self::with_metrics(backend, options, StoreMetrics::register(metrics_registry)?))
    }

    pub fn with_metrics(backend: Arc<dyn FileStore>, options: StoreOptions, metrics: StoreMetrics) -> Self {
        let options = EntryOptions {
            codec: JsonCodec::new(options.pretty),
            metrics,
            debounce: options.debounce,
        };
        Self { backend, options, stores: DashMap::new() }
    }

    /// Open (or re-open) the store named `key`.
    ///
    /// `default` is only used when the key is opened for the first time.
    /// Re-opening with a different document type fails.
    pub fn open<T: Document>(&self, key: &str, default: T) -> Result<PersistentJson<T>, StoreError> {
        validate_key(key)?;
        let registered = self
            .stores
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(%key, "opening store");
                let entry = Arc::new(Entry::new(key, default, Arc::clone(&self.backend), self.options.clone()));
                let handle = PersistentJson::from_entry(Arc::clone(&entry));
                RegisteredStore { entry, managed: Arc::new(handle) }
            })
            .clone();
        let entry = registered.entry.downcast::<Entry<T>>().map_err(|_| StoreError::TypeMismatch {
            key: key.to_string(),
            requested: std::any::type_name::<T>(),
        })?;
        Ok(PersistentJson::from_entry(entry))
    }

    /// Every store opened so far.
    pub fn stores(&self) -> Vec<Arc<dyn ManagedStore>> {
        self.stores.iter().map(|r| Arc::clone(&r.value().managed)).collect()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file_store::{FsFileStore, MemoryFileStore};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn registry(backend: Arc<dyn FileStore>) -> StoreRegistry {
        let metrics = StoreMetrics::unregistered().expect("metrics");
        StoreRegistry::with_metrics(backend, StoreOptions { debounce: Duration::from_secs(60), pretty: false }, metrics)
    }

    #[tokio::test]
    async fn same_key_shares_one_entry() -> Result<(), anyhow::Error> {
        let reg = registry(Arc::new(MemoryFileStore::new()));
        let a = reg.open::<Vec<u32>>("droplist", vec![])?;
        // the second default is ignored
        let b = reg.open::<Vec<u32>>("droplist", vec![9, 9, 9])?;

        a.update(|v| -> Result<(), ()> { v.push(1); Ok(()) }).await.expect("update");
        b.update(|v| -> Result<(), ()> { v.push(2); Ok(()) }).await.expect("update");
        assert_eq!(a.get().await?, vec![1, 2]);
        assert_eq!(b.get().await?, vec![1, 2]);
        assert_eq!(reg.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn reopening_with_other_type_fails() -> Result<(), anyhow::Error> {
        let reg = registry(Arc::new(MemoryFileStore::new()));
        let _users = reg.open::<HashMap<String, u64>>("users", HashMap::new())?;
        let res = reg.open::<Vec<String>>("users", vec![]);
        assert!(matches!(res, Err(StoreError::TypeMismatch { .. })));
        assert!(matches!(reg.open::<u8>("no/slashes", 0), Err(StoreError::InvalidKey(_))));
        Ok(())
    }

    #[tokio::test]
    async fn stores_are_independent_per_key() -> Result<(), anyhow::Error> {
        let reg = registry(Arc::new(MemoryFileStore::new()));
        let users = reg.open::<u64>("users", 0)?;
        let droplist = reg.open::<u64>("droplist", 100)?;
        users.update(|v| -> Result<(), ()> { *v += 1; Ok(()) }).await.expect("update");
        assert_eq!(users.get().await?, 1);
        assert_eq!(droplist.get().await?, 100);
        assert_eq!(reg.stores().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn values_survive_a_new_registry_on_disk() -> Result<(), anyhow::Error> {
        let dir = std::env::temp_dir().join(format!("store_registry_{}", Uuid::new_v4()));
        {
            let reg = registry(Arc::new(FsFileStore::new(&dir).await?));
            let tasks = reg.open::<Vec<String>>("tasks", vec![])?;
            tasks.update(|t| -> Result<(), ()> { t.push("follow".into()); Ok(()) }).await.expect("update");
            for store in reg.stores() {
                store.close().await?;
            }
        }
        let reg = registry(Arc::new(FsFileStore::new(&dir).await?));
        let tasks = reg.open::<Vec<String>>("tasks", vec![])?;
        assert_eq!(tasks.get().await?, vec!["follow".to_string()]);
        let _ = tokio::fs::remove_dir_all(&dir).await;
        Ok(())
    }
}
