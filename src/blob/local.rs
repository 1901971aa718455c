//! Local filesystem storage backend

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use super::StorageBackend;
use crate::error::{Error, Result};

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve a key under the base path, rejecting traversal outside it.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
            return Err(Error::Storage(format!("invalid storage key: {key}")));
        }
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path)
            .await
            .map_err(|e| Error::Storage(format!("read {key}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.base_path.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Some(key) = relative_key(&self.base_path, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<()> {
        fs::metadata(&self.base_path)
            .await
            .map_err(|e| Error::Storage(format!("base path unavailable: {e}")))?;
        Ok(())
    }

    /// Local disk has no presigning; answer with a `file://` pseudo-URL so
    /// callers can treat both backends uniformly.
    async fn presigned_url(&self, key: &str, _expires_in: Duration) -> Result<String> {
        let path = self.resolve(key)?;
        Ok(format!("file://{}", path.display()))
    }
}

fn relative_key(base: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(base)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.initialize().await.unwrap();

        storage.upload("a/b.txt", b"hello".to_vec()).await.unwrap();
        let data = storage.download("a/b.txt").await.unwrap();
        assert_eq!(data, b"hello");

        let keys = storage.list("a/").await.unwrap();
        assert_eq!(keys, vec!["a/b.txt"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.initialize().await.unwrap();

        storage.upload("x.bin", vec![1, 2, 3]).await.unwrap();
        storage.delete("x.bin").await.unwrap();
        storage.delete("x.bin").await.unwrap();
        assert!(storage.download("x.bin").await.is_err());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.download("../etc/passwd").await.is_err());
        assert!(storage.upload("/abs", Vec::new()).await.is_err());
    }
}
