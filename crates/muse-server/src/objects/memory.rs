use async_trait::async_trait;
use chrono::{DateTime, Utc};
use muse_common::ids::validate_object_key;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{expires_at, ObjectMetadata, ObjectResult, ObjectStore, ObjectStoreError, PresignedUrl};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
}

/// In-process object store for tests and local runs.
///
/// Presigned URLs use a `memory://` scheme and cannot be fetched; tests
/// place payloads with [`MemoryObjectStore::insert`] instead.
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    failures: Arc<AtomicU32>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("muse-media")
    }
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Store an object directly, standing in for a client upload.
    pub async fn insert(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Make the next `n` calls fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> ObjectResult<()> {
        let armed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match armed {
            Ok(_) => Err(ObjectStoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn url(&self, key: &str, ttl: Duration) -> PresignedUrl {
        let expires_at = expires_at(ttl);
        PresignedUrl {
            url: format!(
                "memory://{}/{}?expires={}",
                self.bucket,
                key,
                expires_at.timestamp()
            ),
            expires_at,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn presign_upload(
        &self,
        key: &str,
        _content_type: &str,
        ttl: Duration,
    ) -> ObjectResult<PresignedUrl> {
        validate_object_key(key)?;
        self.injected_failure()?;
        Ok(self.url(key, ttl))
    }

    async fn presign_download(&self, key: &str, ttl: Duration) -> ObjectResult<PresignedUrl> {
        validate_object_key(key)?;
        self.injected_failure()?;
        Ok(self.url(key, ttl))
    }

    #[instrument(skip(self))]
    async fn head_object(&self, key: &str) -> ObjectResult<Option<ObjectMetadata>> {
        validate_object_key(key)?;
        self.injected_failure()?;
        Ok(self.objects.read().await.get(key).map(|o| ObjectMetadata {
            key: key.to_string(),
            size: o.data.len() as u64,
            content_type: Some(o.content_type.clone()),
            last_modified: Some(o.last_modified),
        }))
    }

    #[instrument(skip(self))]
    async fn get_object(&self, key: &str) -> ObjectResult<Vec<u8>> {
        validate_object_key(key)?;
        self.injected_failure()?;
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> ObjectResult<()> {
        validate_object_key(key)?;
        self.injected_failure()?;
        self.insert(key, data, content_type).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_object(&self, source: &str, dest: &str) -> ObjectResult<()> {
        validate_object_key(source)?;
        validate_object_key(dest)?;
        self.injected_failure()?;
        let mut objects = self.objects.write().await;
        let mut object = objects
            .get(source)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(source.to_string()))?;
        object.last_modified = Utc::now();
        objects.insert(dest.to_string(), object);
        debug!(source, dest, "Copied object");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, key: &str) -> ObjectResult<()> {
        validate_object_key(key)?;
        self.injected_failure()?;
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use muse_common::{error::Classify, ErrorKind};

    #[tokio::test]
    async fn test_head_copy_delete() {
        let store = MemoryObjectStore::default();
        assert!(store.head_object("a/b.mp3").await.unwrap().is_none());

        store.insert("a/b.mp3", vec![1, 2, 3], "audio/mpeg").await;
        let meta = store.head_object("a/b.mp3").await.unwrap().unwrap();
        assert_eq!(meta.size, 3);
        assert_eq!(meta.content_type.as_deref(), Some("audio/mpeg"));

        store.copy_object("a/b.mp3", "c/d.mp3").await.unwrap();
        store.copy_object("a/b.mp3", "c/d.mp3").await.unwrap();
        store.delete_object("a/b.mp3").await.unwrap();
        store.delete_object("a/b.mp3").await.unwrap();

        assert_eq!(store.keys().await, vec!["c/d.mp3"]);
        assert_eq!(store.get_object("c/d.mp3").await.unwrap(), vec![1, 2, 3]);

        let err = store.copy_object("a/b.mp3", "e/f.mp3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let store = MemoryObjectStore::default();
        store.fail_next(2);
        for _ in 0..2 {
            let err = store.head_object("x/y").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transient);
        }
        assert!(store.head_object("x/y").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_presigned_url_shape() {
        let store = MemoryObjectStore::new("bucket");
        let url = store
            .presign_upload("uploads/o/u/f.mp3", "audio/mpeg", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.url.starts_with("memory://bucket/uploads/o/u/f.mp3?expires="));
        assert!(url.expires_at > Utc::now());
    }
}
