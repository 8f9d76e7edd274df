//! An in-memory object store.

use crate::backend::ObjectStore;
use crate::errors::BackendError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    version: String,
}

/// Object storage kept in a concurrent map, with call counters.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), StoredObject>,
    head_calls: AtomicUsize,
    put_calls: AtomicUsize,
    versions: AtomicUsize,
    head_error: Mutex<Option<BackendError>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `head_object` call fail with `error`.
    pub fn fail_head(&self, error: BackendError) {
        *self.head_error.lock() = Some(error);
    }

    /// Returns the body of a stored object.
    #[must_use]
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of `head_object` calls so far.
    #[must_use]
    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    /// Number of `put_object` calls so far.
    #[must_use]
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<String>, BackendError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.head_error.lock().clone() {
            return Err(err);
        }
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| Some(o.version.clone()))
            .ok_or_else(|| BackendError::not_found(format!("s3://{bucket}/{key}")))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<Option<String>, BackendError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let version = format!("v{}", self.versions.fetch_add(1, Ordering::SeqCst) + 1);
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                version: version.clone(),
            },
        );
        Ok(Some(version))
    }
}
