//! Types for the job orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::job::{
    ErrorClass, ErrorKind, Job, JobConfig, JobStatus, JobStoreError, TransitionError,
};
use crate::queue::QueueError;
use crate::retry::Transient;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed submission. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job not found: {0}")]
    NotFound(String),

    /// Result requested before the job succeeded.
    #[error("job {job_id} is not ready (status {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error("cannot {operation} job {job_id} in status {status}")]
    InvalidState {
        job_id: String,
        status: JobStatus,
        operation: String,
    },

    /// Compare-and-set kept losing to concurrent writers.
    #[error("job {0} is being modified concurrently")]
    Contended(String),

    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("work queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("artifact store error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("state machine error: {0}")]
    Transition(#[from] TransitionError),
}

impl OrchestratorError {
    /// True when a backing store is temporarily unreachable.
    pub fn is_unavailable(&self) -> bool {
        match self {
            OrchestratorError::Store(e) => e.is_transient(),
            OrchestratorError::Artifact(e) => e.is_transient(),
            OrchestratorError::Queue(QueueError::Busy(_)) => true,
            _ => false,
        }
    }
}

/// A request to translate one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub input_ref: String,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(default)]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub priority: u16,
}

impl SubmitRequest {
    pub fn new(input_ref: impl Into<String>, config: JobConfig) -> Self {
        Self {
            input_ref: input_ref.into(),
            config,
            client_ref: None,
            priority: 0,
        }
    }

    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }
}

/// Result of a submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    /// True when an existing job was returned instead of creating one.
    pub deduplicated: bool,
}

/// What one execution attempt produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Succeeded {
        output_refs: Vec<String>,
    },
    Failed {
        kind: ErrorKind,
        class: ErrorClass,
        detail: String,
    },
}

impl WorkerOutcome {
    pub fn succeeded(output_refs: Vec<String>) -> Self {
        Self::Succeeded { output_refs }
    }

    pub fn retryable(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            class: ErrorClass::Retryable,
            detail: detail.into(),
        }
    }

    pub fn fatal(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            class: ErrorClass::Fatal,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Succeeded { .. })
    }

    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            WorkerOutcome::Succeeded { .. } => "succeeded",
            WorkerOutcome::Failed { kind, .. } => kind.as_str(),
        }
    }
}

/// How [`on_worker_result`](super::JobOrchestrator::on_worker_result) handled a result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultDisposition {
    /// The record moved to a new state.
    Applied(Job),
    /// Same success delivered again; nothing changed.
    Duplicate,
    /// Result from a superseded attempt; nothing changed.
    Stale,
}

/// Repairs made by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// RUNNING jobs whose lease ran out, fed back as lost-worker failures.
    pub lease_expired: usize,
    /// RETRYING jobs moved back to QUEUED.
    pub requeued: usize,
    /// QUEUED jobs that had no queue message.
    pub reenqueued: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.lease_expired == 0 && self.requeued == 0 && self.reenqueued == 0
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the reconciliation sweep is running.
    pub running: bool,
    pub queued: i64,
    pub running_jobs: i64,
    pub retrying: i64,
    pub succeeded: i64,
    pub failed: i64,
    /// Queue messages ready or waiting for their delay, excluding leased ones.
    pub queue_depth: u64,
}
