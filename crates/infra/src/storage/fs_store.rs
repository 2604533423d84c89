//! Filesystem blob store.
//!
//! Blobs live under a configurable root with relative keys derived in the
//! domain layer (`{yyyy}/{MM}/{dd}/{id}.{ext}`, `{id}-ocr/ocr-results.json`).
//! Keys must stay inside the root: absolute keys and `..` components are
//! integrity errors before any I/O happens.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use docflow_core::BlobStore;
use docflow_domain::{PipelineError, Result};
use tokio::fs;
use tracing::debug;

use crate::errors::map_io_error;

/// Blob store rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a relative key against the root, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let traversal_free = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !traversal_free {
            return Err(PipelineError::Integrity(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(map_io_error)?;
        }
        fs::write(&path, bytes).await.map_err(map_io_error)?;
        debug!(key, size = bytes.len(), "blob stored");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(map_io_error(err)),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(map_io_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use docflow_domain::storage::{document_blob_key, ocr_blob_key};
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;

    fn setup() -> (FsBlobStore, TempDir) {
        let dir = TempDir::new().expect("temp dir created");
        (FsBlobStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn store_and_load_round_trip() {
        let (store, _dir) = setup();
        let key = document_blob_key(Uuid::new_v4(), "report.pdf", Utc::now());

        store.store(&key, b"pdf bytes").await.expect("store succeeds");
        let loaded = store.load(&key).await.expect("load succeeds");
        assert_eq!(loaded.as_deref(), Some(b"pdf bytes".as_slice()));
    }

    #[tokio::test]
    async fn store_creates_nested_directories() {
        let (store, dir) = setup();
        let id = Uuid::new_v4();
        let key = ocr_blob_key(id);

        store.store(&key, br#"{"pages":[]}"#).await.expect("store succeeds");
        assert!(dir.path().join(format!("{id}-ocr")).join("ocr-results.json").exists());
    }

    #[tokio::test]
    async fn load_missing_blob_returns_none() {
        let (store, _dir) = setup();
        let loaded = store.load("2026/08/01/missing.pdf").await.expect("load succeeds");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let (store, _dir) = setup();
        store.store("a/b.bin", b"x").await.expect("store succeeds");

        assert!(store.remove("a/b.bin").await.expect("remove succeeds"));
        assert!(!store.remove("a/b.bin").await.expect("second remove succeeds"));
        assert!(store.load("a/b.bin").await.expect("load succeeds").is_none());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (store, _dir) = setup();
        for key in ["../escape.bin", "a/../../escape.bin", "/etc/passwd", ""] {
            let err = store.load(key).await.expect_err("key must be rejected");
            assert!(matches!(err, PipelineError::Integrity(_)), "{key} should be integrity");
        }
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let (store, _dir) = setup();
        store.store("k.bin", b"one").await.expect("store succeeds");
        store.store("k.bin", b"two").await.expect("overwrite succeeds");
        let loaded = store.load("k.bin").await.expect("load succeeds");
        assert_eq!(loaded.as_deref(), Some(b"two".as_slice()));
    }
}
