//! Blob storage for large payloads
//!
//! Abstracts over local-disk and S3-compatible backends with identical CRUD
//! semantics. Presigned URLs come from the remote backend; the local
//! backend answers with `file://` pseudo-URLs.

pub mod local;
pub mod s3;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use local::LocalStorage;
pub use s3::{S3Config, S3Storage};

/// Storage trait for different backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()>;
    async fn download(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn health_check(&self) -> Result<()>;

    /// Generate a temporary public URL for an object.
    async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String>;
}

/// Main storage interface
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    /// Create local-disk storage rooted at `base_path`.
    pub fn local(base_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            backend: Arc::new(LocalStorage::new(base_path)),
        }
    }

    /// Create S3-compatible storage.
    pub async fn s3(config: S3Config) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(S3Storage::new(config).await?),
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    pub async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.backend.upload(key, data).await
    }

    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.backend.download(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.backend.list(prefix).await
    }

    pub async fn presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        self.backend.presigned_url(key, expires_in).await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.backend.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_storage_roundtrip_through_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::local(dir.path());
        storage.initialize().await.unwrap();

        storage
            .upload("chunks/doc.txt", b"chunk body".to_vec())
            .await
            .unwrap();
        assert_eq!(storage.download("chunks/doc.txt").await.unwrap(), b"chunk body");
        assert_eq!(storage.list("chunks/").await.unwrap(), vec!["chunks/doc.txt"]);

        let url = storage
            .presigned_url("chunks/doc.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));

        storage.delete("chunks/doc.txt").await.unwrap();
        assert!(storage.download("chunks/doc.txt").await.is_err());
        storage.health_check().await.unwrap();
    }
}
