//! Blob storage backends.
//!
//! The registry only needs three verbs, so the seam is a small async trait.
//! [`FsBlobStore`] is the production backend: every `put` lands in a
//! temporary sibling first and is renamed into place, so readers of a key
//! observe either the previous bytes or the new bytes, never a partial
//! write. [`MemoryBlobStore`] backs tests.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key, replacing any previous value atomically.
    async fn put(&self, key: &str, bytes: &[u8]) -> RegistryResult<()>;

    /// Fetch the bytes under a key.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when the key has never been written.
    async fn get(&self, key: &str) -> RegistryResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> RegistryResult<bool>;
}

/// Filesystem-backed store rooted at a directory; keys map to relative
/// paths beneath it.
pub struct FsBlobStore {
    root: PathBuf,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> RegistryResult<PathBuf> {
        let relative = Path::new(key);
        let traverses = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if key.is_empty() || traverses {
            return Err(RegistryError::Storage(format!("invalid blob key: {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> RegistryResult<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Unique temp sibling, renamed into place on the same filesystem.
        let suffix = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}", suffix));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key, bytes = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> RegistryResult<Vec<u8>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RegistryError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> RegistryResult<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> RegistryResult<()> {
        self.write_guard().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> RegistryResult<Vec<u8>> {
        self.read_guard()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> RegistryResult<bool> {
        Ok(self.read_guard().contains_key(key))
    }
}
