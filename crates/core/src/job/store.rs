//! Job storage trait and types.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{Job, JobStatus};
use crate::retry::{RetryPolicy, Transient};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    /// The stored version no longer matches the caller's snapshot.
    #[error("Job {job_id} was modified concurrently (expected version {expected_version})")]
    Conflict {
        job_id: String,
        expected_version: i64,
    },

    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Transient for JobStoreError {
    fn is_transient(&self) -> bool {
        matches!(self, JobStoreError::Unavailable(_))
    }
}

impl From<serde_json::Error> for JobStoreError {
    fn from(e: serde_json::Error) -> Self {
        JobStoreError::Serialization(e.to_string())
    }
}

/// Filter for querying jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub client_ref: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            client_ref: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// The store is the only place job state lives. Every mutation after
/// creation goes through [`compare_and_set`](JobStore::compare_and_set).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &str;

    /// Persist a new job. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, job: &Job) -> Result<Job, JobStoreError>;

    /// Get a job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError>;

    /// List jobs matching the filter, highest priority then oldest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Count jobs matching the filter (limit and offset are ignored).
    async fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError>;

    /// Replace the record with `next` if its stored version still equals
    /// `next.version`. The stored copy gets `version + 1` and a fresh
    /// `updated_at`; that copy is returned.
    async fn compare_and_set(&self, next: &Job) -> Result<Job, JobStoreError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), JobStoreError> {
        self.count(&JobFilter::new().with_limit(1)).await.map(|_| ())
    }
}

/// Wraps a store and retries transient failures with the adapter policy.
pub struct RetryingJobStore {
    inner: Arc<dyn JobStore>,
    policy: RetryPolicy,
}

impl RetryingJobStore {
    pub fn new(inner: Arc<dyn JobStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl JobStore for RetryingJobStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create(&self, job: &Job) -> Result<Job, JobStoreError> {
        let mut tried = false;
        self.policy
            .run("job_store.create", || {
                let first = !tried;
                tried = true;
                async move {
                    match self.inner.create(job).await {
                        // An earlier timed-out try may have committed.
                        Err(JobStoreError::AlreadyExists(id)) if !first => {
                            debug!("Job {} already created by an earlier try", id);
                            self.inner
                                .get(&id)
                                .await?
                                .ok_or(JobStoreError::AlreadyExists(id))
                        }
                        other => other,
                    }
                }
            })
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, JobStoreError> {
        self.policy
            .run("job_store.get", || self.inner.get(id))
            .await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        self.policy
            .run("job_store.list", || self.inner.list(filter))
            .await
    }

    async fn count(&self, filter: &JobFilter) -> Result<i64, JobStoreError> {
        self.policy
            .run("job_store.count", || self.inner.count(filter))
            .await
    }

    async fn compare_and_set(&self, next: &Job) -> Result<Job, JobStoreError> {
        self.policy
            .run("job_store.compare_and_set", || {
                self.inner.compare_and_set(next)
            })
            .await
    }

    async fn ping(&self) -> Result<(), JobStoreError> {
        self.inner.ping().await
    }
}
