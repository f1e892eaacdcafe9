//! Object store abstraction with deterministic artifact keys.
//!
//! Keys are a function of the content id alone, which makes media re-drives
//! idempotent: a re-run probes `exists` and skips work already published.
//! Public URLs are formed as `<public_base>/<bucket>/<key>`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use inlet_core::{Error, ObjectStoreConfig, Result};

/// Key of the processed MP4 artifact.
pub fn processed_key(content_id: &str) -> String {
    format!("content/{}/processed.mp4", content_id)
}

/// Key of the original download, preserving its extension.
pub fn original_key(content_id: &str, ext: &str) -> String {
    format!("content/{}/original.{}", content_id, ext)
}

/// Key of the thumbnail artifact.
pub fn thumbnail_key(content_id: &str) -> String {
    format!("content/{}/thumbnail.jpg", content_id)
}

/// Blob storage as the media stage needs it. The production S3 wire client
/// is an external collaborator behind this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key, returning the public URL.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String>;

    /// Store a local file under a key, returning the public URL.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String>;

    /// Read an object back, `None` when absent. Enrichment uses this to
    /// reach processed artifacts without going through the public URL.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Public URL for a key, whether or not it exists yet.
    fn public_url(&self, key: &str) -> String;
}

/// Filesystem-backed object store: objects live under `<root>/<bucket>/<key>`.
pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
    public_base: String,
}

impl FsObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        Self {
            root: config.root.clone(),
            bucket: config.bucket.clone(),
            public_base: config.public_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        // Keys are internal and slash-delimited; reject traversal anyway.
        if key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(Error::InvalidData(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(&self.bucket).join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(key, "Stored object");
        Ok(self.public_url(key))
    }

    async fn put_file(&self, key: &str, source: &Path, _content_type: &str) -> Result<String> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &path).await?;
        debug!(key, "Stored object from file");
        Ok(self.public_url(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base, self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> FsObjectStore {
        FsObjectStore::new(&ObjectStoreConfig {
            root: root.to_path_buf(),
            bucket: "inlet-media".into(),
            public_url: "http://localhost:9000/".into(),
            region: None,
        })
    }

    #[test]
    fn test_deterministic_keys() {
        assert_eq!(processed_key("c-1"), "content/c-1/processed.mp4");
        assert_eq!(original_key("c-1", "webm"), "content/c-1/original.webm");
        assert_eq!(thumbnail_key("c-1"), "content/c-1/thumbnail.jpg");
    }

    #[tokio::test]
    async fn test_put_then_exists_and_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let key = processed_key("c-1");

        assert!(!store.exists(&key).await.unwrap());
        let url = store.put(&key, b"mp4-bytes".to_vec(), "video/mp4").await.unwrap();
        assert_eq!(url, "http://localhost:9000/inlet-media/content/c-1/processed.mp4");
        assert!(store.exists(&key).await.unwrap());

        let stored = std::fs::read(dir.path().join("inlet-media").join(&key)).unwrap();
        assert_eq!(stored, b"mp4-bytes");
    }

    #[tokio::test]
    async fn test_put_file_copies_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let source = dir.path().join("local.mp4");
        std::fs::write(&source, b"payload").unwrap();

        store
            .put_file(&thumbnail_key("c-2"), &source, "image/jpeg")
            .await
            .unwrap();
        assert!(store.exists(&thumbnail_key("c-2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.put("../escape", vec![], "x").await.is_err());
        assert!(store.exists("a//b").await.is_err());
    }

    #[test]
    fn test_public_url_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(
            store.public_url("content/c/thumbnail.jpg"),
            "http://localhost:9000/inlet-media/content/c/thumbnail.jpg"
        );
    }
}
