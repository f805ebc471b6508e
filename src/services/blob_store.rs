//! src/services/blob_store.rs
//!
//! Content-addressable blob storage. Two backends implement [`BlobStore`]:
//! [`FsBlobStore`] writes payloads beneath `base_path/{key[0..2]}/{key[2..4]}/{key}`,
//! and [`MemoryBlobStore`] keeps them in a map for tests and throwaway deployments.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::debug;
use uuid::Uuid;

/// Shortest key that still yields two full shard segments.
const MIN_KEY_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob key `{0}`")]
    InvalidKey(String),
    #[error("blob storage path `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobStoreError>;

/// Persist, fetch and remove byte blobs by content key.
///
/// Writes and deletes are atomic per key from one caller's point of view.
/// Concurrent writers of the same key are not ordered; since keys are content
/// hashes they always carry identical bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> BlobResult<()>;

    async fn get(&self, key: &str) -> BlobResult<Bytes>;

    async fn delete(&self, key: &str) -> BlobResult<()>;
}

/// Reject anything that is not a plain alphanumeric token, so keys can never
/// escape the shard layout.
fn ensure_key_safe(key: &str) -> BlobResult<()> {
    if key.len() < MIN_KEY_LEN || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(BlobStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Filesystem backend with two-level sharding on the key prefix.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `base_path`, which must already exist and be a
    /// directory.
    pub async fn open(base_path: impl Into<PathBuf>) -> BlobResult<Self> {
        let base_path = base_path.into();
        let meta = fs::metadata(&base_path).await?;
        if !meta.is_dir() {
            return Err(BlobStoreError::NotADirectory(base_path));
        }
        Ok(Self { base_path })
    }

    /// `base_path/{key[0..2]}/{key[2..4]}/{key}`. Callers validate the key first.
    fn blob_path(&self, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(&key[0..2]);
        path.push(&key[2..4]);
        path.push(key);
        path
    }

    fn map_not_found(err: io::Error, key: &str) -> BlobStoreError {
        if err.kind() == ErrorKind::NotFound {
            BlobStoreError::NotFound(key.to_string())
        } else {
            BlobStoreError::Io(err)
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    /// Write to a temp file beside the target, fsync, then rename into place.
    async fn put(&self, key: &str, data: Bytes) -> BlobResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("blob path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let written = async {
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }

        let renamed = match fs::rename(&tmp_path, &file_path).await {
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                match fs::remove_file(&file_path).await {
                    Ok(()) => fs::rename(&tmp_path, &file_path).await,
                    Err(err) => Err(err),
                }
            }
            other => other,
        };
        if let Err(err) = renamed {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }

        debug!("wrote blob {} ({} bytes)", file_path.display(), data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        ensure_key_safe(key)?;
        let data = fs::read(self.blob_path(key))
            .await
            .map_err(|err| Self::map_not_found(err, key))?;
        Ok(Bytes::from(data))
    }

    /// Shard directories are left in place.
    async fn delete(&self, key: &str) -> BlobResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        fs::remove_file(&file_path)
            .await
            .map_err(|err| Self::map_not_found(err, key))?;
        debug!("removed blob {}", file_path.display());
        Ok(())
    }
}

/// In-process backend. Contents are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> BlobResult<()> {
        ensure_key_safe(key)?;
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        ensure_key_safe(key)?;
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        ensure_key_safe(key)?;
        self.blobs
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BlobStoreError::NotFound(key.to_string()))
    }
}
