use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BlobError, BlobStore, PutOptions};

/// A blob held by [`MemoryBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Object body.
    pub body: Vec<u8>,
    /// Metadata supplied with the write.
    pub options: PutOptions,
}

/// In-process blob store with operation counters.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<(String, String), StoredBlob>>,
    gets: AtomicU64,
    puts: AtomicU64,
}

impl MemoryBlobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a put.
    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredBlob {
                body,
                options: PutOptions::default(),
            },
        );
    }

    /// Copy of the object at `bucket/key`, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredBlob> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored under `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns `true` when no object is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Number of `get` calls served.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `put` calls served.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|blob| blob.body.clone())
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: PutOptions,
    ) -> Result<(), BlobError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredBlob { body, options },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_counts_operations() {
        let store = MemoryBlobStore::new();
        store
            .put("bucket", "a/b.json.gz", vec![1, 2, 3], PutOptions::gzip_json())
            .await
            .expect("put");

        assert_eq!(store.get("bucket", "a/b.json.gz").await.expect("get"), vec![1, 2, 3]);
        assert!(matches!(
            store.get("bucket", "missing").await,
            Err(BlobError::NotFound { .. })
        ));
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.get_count(), 2);
        assert_eq!(store.keys("bucket"), vec!["a/b.json.gz".to_string()]);
        assert_eq!(
            store
                .object("bucket", "a/b.json.gz")
                .and_then(|blob| blob.options.content_encoding),
            Some("gzip".to_string())
        );
    }
}
