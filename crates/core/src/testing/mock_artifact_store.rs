//! Mock artifact store for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::artifact::{validate_key, ArtifactError, ArtifactStore};

/// In-memory implementation of the ArtifactStore trait.
///
/// Provides controllable behavior for testing:
/// - Seed objects with [`insert`](Self::insert)
/// - Inject failures for the next N calls of any operation
/// - Count calls per operation
///
/// # Example
///
/// ```rust,ignore
/// use doctrans_core::testing::MockArtifactStore;
///
/// let store = MockArtifactStore::new();
/// store.insert("uploads/paper.pdf", b"%PDF-1.7".to_vec()).await;
/// store.fail_next(1, ArtifactError::unavailable("reset")).await;
///
/// // First get fails, second succeeds
/// assert!(store.get("uploads/paper.pdf").await.is_err());
/// assert!(store.get("uploads/paper.pdf").await.is_ok());
/// ```
#[derive(Debug)]
pub struct MockArtifactStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Failures handed out, one per call, before the store behaves normally.
    failures: Arc<RwLock<VecDeque<ArtifactError>>>,
    calls: Arc<RwLock<HashMap<String, usize>>>,
}

impl Default for MockArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockArtifactStore {
    /// Create an empty mock store.
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(VecDeque::new())),
            calls: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store an object directly, bypassing failure injection and counters.
    pub async fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects.write().await.insert(key.into(), bytes);
    }

    /// Make the next `count` calls (of any operation) fail with `error`.
    pub async fn fail_next(&self, count: usize, error: ArtifactError) {
        let mut failures = self.failures.write().await;
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Number of calls made to `operation` ("get", "put" or "exists").
    pub async fn call_count(&self, operation: &str) -> usize {
        self.calls.read().await.get(operation).copied().unwrap_or(0)
    }

    /// Bytes stored under `key`, if any.
    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn record(&self, operation: &str, key: &str) -> Result<(), ArtifactError> {
        *self
            .calls
            .write()
            .await
            .entry(operation.to_string())
            .or_default() += 1;

        if let Some(error) = self.failures.write().await.pop_front() {
            return Err(error);
        }
        validate_key(key)
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        self.record("get", key).await?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        self.record("put", key).await?;
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(key.to_string())
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        self.record("exists", key).await?;
        Ok(self.objects.read().await.contains_key(key))
    }
}
