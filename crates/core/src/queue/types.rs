//! Work queue contract and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from work queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(String),

    #[error("Queue busy: {0}")]
    Busy(String),
}

/// A temporary exclusive claim on one queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub message_id: i64,
    pub job_id: String,
    /// Opaque token proving this delivery; acks from older deliveries are ignored.
    pub receipt: String,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    pub leased_until: DateTime<Utc>,
}

/// Durable, at-least-once delivery of job ids to workers.
///
/// A dequeued message stays invisible until its visibility timeout elapses;
/// without an [`ack`](WorkQueue::ack) it is delivered again. At most one
/// active lease exists per job id at any time.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Schedule `job_id` for delivery no earlier than `not_before`.
    async fn enqueue(
        &self,
        job_id: &str,
        not_before: DateTime<Utc>,
        priority: u16,
    ) -> Result<(), QueueError>;

    /// Lease the next deliverable message, if any, without waiting.
    async fn try_dequeue(&self) -> Result<Option<Lease>, QueueError>;

    /// Wait until a message is deliverable and lease it.
    async fn dequeue(&self) -> Result<Lease, QueueError>;

    /// Remove the leased message. Returns false if the lease was stale.
    async fn ack(&self, lease: &Lease) -> Result<bool, QueueError>;

    /// Whether any message (leased or not) exists for `job_id`.
    async fn contains(&self, job_id: &str) -> Result<bool, QueueError>;

    /// Messages not currently leased.
    async fn depth(&self) -> Result<u64, QueueError>;

    /// Job ids with an unexpired lease.
    async fn leased_jobs(&self) -> Result<Vec<String>, QueueError>;
}
