//! Retrying front for an [`ArtifactStore`].

use std::sync::Arc;

use super::error::ArtifactError;
use super::traits::ArtifactStore;
use crate::retry::RetryPolicy;

/// Applies the adapter retry policy to every object store call. Transient
/// errors are retried; anything else, or the last transient error once the
/// budget is spent, is returned to the caller.
#[derive(Clone)]
pub struct ArtifactGateway {
    store: Arc<dyn ArtifactStore>,
    policy: RetryPolicy,
}

impl ArtifactGateway {
    pub fn new(store: Arc<dyn ArtifactStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        self.policy
            .run("artifact.get", || self.store.get(key))
            .await
    }

    /// `put` takes the bytes by value, so each try gets its own copy.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, ArtifactError> {
        self.policy
            .run("artifact.put", || self.store.put(key, bytes.to_vec()))
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        self.policy
            .run("artifact.exists", || self.store.exists(key))
            .await
    }
}
