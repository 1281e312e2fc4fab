use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tracing::debug;

use crate::errors::StoreError;

/// Durable byte storage with one record per store key.
/// Implementations can be file-backed or in-memory (tests).
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Load the record for `key`; `Ok(None)` when no record exists.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Replace the whole record for `key`.
    async fn replace(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// Keep an undecodable record aside so the next write does not destroy it.
    async fn quarantine(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Store keys become file names, so they are restricted to a safe alphabet.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok { Ok(()) } else { Err(StoreError::InvalidKey(key.to_string())) }
}

/// One `<key>.json` file per store under a data directory.
#[derive(Debug, Clone)]
pub struct FsFileStore {
    dir: PathBuf,
}

impl FsFileStore {
    /// Initialize the store rooted at `dir`. Creates the directory if missing.
    pub async fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir.display().to_string(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl FileStore for FsFileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        match fs::read(self.record_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn replace(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        // write-then-rename keeps the previous record intact if the write dies halfway
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        fs::write(&tmp, bytes).await.map_err(|e| StoreError::io(key, e))?;
        fs::rename(&tmp, self.record_path(key))
            .await
            .map_err(|e| StoreError::io(key, e))?;
        debug!(%key, bytes = bytes.len(), "record replaced");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        match fs::metadata(self.record_path(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn quarantine(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let path = self.dir.join(format!("{key}.corrupt-{stamp}.json"));
        fs::write(&path, bytes).await.map_err(|e| StoreError::io(key, e))
    }
}

/// In-memory backing store. Load and write failures can be injected to
/// exercise the error paths.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    records: DashMap<String, Vec<u8>>,
    quarantined: DashMap<String, Vec<u8>>,
    failing_loads: AtomicUsize,
    failing_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw record, bypassing the codec.
    pub fn insert_raw(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.records.insert(key.to_string(), bytes.into());
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn quarantined(&self, key: &str) -> Option<Vec<u8>> {
        self.quarantined.get(key).map(|r| r.value().clone())
    }

    /// Make the next `n` calls to `load` fail.
    pub fn fail_next_loads(&self, n: usize) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `replace` fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Number of successful `replace` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if take_one(&self.failing_loads) {
            return Err(StoreError::io(key, io::Error::other("injected load failure")));
        }
        Ok(self.raw(key))
    }

    async fn replace(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if take_one(&self.failing_writes) {
            return Err(StoreError::io(key, io::Error::other("injected write failure")));
        }
        self.records.insert(key.to_string(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(key))
    }

    async fn quarantine(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.quarantined.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn fs_file_store_replace_load_exists() -> Result<(), anyhow::Error> {
        let tmp = std::env::temp_dir().join(format!("fs_file_store_{}", Uuid::new_v4()));
        let store = FsFileStore::new(&tmp).await?;

        // absent record
        assert!(!store.exists("users").await?);
        assert_eq!(store.load("users").await?, None);

        store.replace("users", b"{\"a\":1}").await?;
        assert!(store.exists("users").await?);
        assert_eq!(store.load("users").await?.as_deref(), Some(&b"{\"a\":1}"[..]));

        // replace is whole-record
        store.replace("users", b"{}").await?;
        assert_eq!(store.load("users").await?.as_deref(), Some(&b"{}"[..]));
        assert!(!tmp.join("users.json.tmp").exists());

        let _ = tokio::fs::remove_dir_all(&tmp).await;
        Ok(())
    }

    #[tokio::test]
    async fn fs_file_store_rejects_path_like_keys() -> Result<(), anyhow::Error> {
        let tmp = std::env::temp_dir().join(format!("fs_file_store_{}", Uuid::new_v4()));
        let store = FsFileStore::new(&tmp).await?;
        assert!(matches!(store.load("../etc").await, Err(StoreError::InvalidKey(_))));
        assert!(matches!(store.replace("a/b", b"x").await, Err(StoreError::InvalidKey(_))));
        assert!(validate_key("xRequests").is_ok());
        assert!(validate_key("").is_err());
        let _ = tokio::fs::remove_dir_all(&tmp).await;
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_injected_failures_run_out() -> Result<(), anyhow::Error> {
        let store = MemoryFileStore::new();
        store.fail_next_writes(2);
        assert!(store.replace("k", b"1").await.is_err());
        assert!(store.replace("k", b"2").await.is_err());
        store.replace("k", b"3").await?;
        assert_eq!(store.raw("k"), Some(b"3".to_vec()));
        assert_eq!(store.writes(), 1);

        store.fail_next_loads(1);
        assert!(matches!(store.load("k").await, Err(StoreError::Io { .. })));
        assert_eq!(store.load("k").await?, Some(b"3".to_vec()));
        Ok(())
    }

    #[tokio::test]
    async fn fs_file_store_quarantine_keeps_timestamped_copy() -> Result<(), anyhow::Error> {
        let tmp = std::env::temp_dir().join(format!("fs_file_store_{}", Uuid::new_v4()));
        let store = FsFileStore::new(&tmp).await?;
        store.replace("users", b"{not json").await?;
        store.quarantine("users", b"{not json").await?;

        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&tmp).await?;
        while let Some(e) = dir.next_entry().await? {
            names.push(e.file_name().to_string_lossy().into_owned());
        }
        let copy = names
            .iter()
            .find(|n| n.starts_with("users.corrupt-") && n.ends_with(".json"))
            .ok_or_else(|| anyhow::anyhow!("no quarantine copy in {names:?}"))?;
        assert_eq!(tokio::fs::read(tmp.join(copy)).await?, b"{not json");
        // the live record is left for the next write to replace
        assert!(store.exists("users").await?);

        let _ = tokio::fs::remove_dir_all(&tmp).await;
        Ok(())
    }
}
