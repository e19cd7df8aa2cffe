//! State machine transitions on [`Job`] values.
//!
//! Each function returns the next record without persisting it; callers
//! write the result through [`JobStore::compare_and_set`](super::JobStore).
//! Every transition keeps these facts true:
//!
//! - `output_refs` is non-empty iff the status is SUCCEEDED
//! - `attempt` never exceeds `max_attempts`
//! - terminal states are never left

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Job, JobError, JobProgress, JobStatus};

/// A transition that the state machine does not allow.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("job {job_id}: cannot move from {from} to {to}")]
    Illegal {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0}: success requires at least one output")]
    NoOutputs(String),

    #[error("job {0}: no attempts left to schedule a retry")]
    NoAttemptsLeft(String),

    #[error("job {0}: already in a terminal state")]
    Terminal(String),

    #[error("job {0}: progress can only be recorded while running")]
    NotRunning(String),
}

fn check(job: &Job, to: JobStatus) -> Result<(), TransitionError> {
    if job.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionError::Illegal {
            job_id: job.id.clone(),
            from: job.status,
            to,
        })
    }
}

impl Job {
    /// QUEUED -> RUNNING. The lease marks when the sweep may reclaim the job.
    /// Progress of an earlier attempt is cleared.
    pub fn start(&self, lease_expires_at: DateTime<Utc>) -> Result<Job, TransitionError> {
        check(self, JobStatus::Running)?;
        Ok(Job {
            status: JobStatus::Running,
            lease_expires_at: Some(lease_expires_at),
            retry_at: None,
            progress: None,
            ..self.clone()
        })
    }

    /// Record engine progress on a RUNNING job. The status is unchanged.
    pub fn record_progress(&self, progress: JobProgress) -> Result<Job, TransitionError> {
        if self.status != JobStatus::Running {
            return Err(TransitionError::NotRunning(self.id.clone()));
        }
        Ok(Job {
            progress: Some(progress),
            ..self.clone()
        })
    }

    /// RUNNING -> SUCCEEDED.
    pub fn succeed(&self, output_refs: Vec<String>) -> Result<Job, TransitionError> {
        check(self, JobStatus::Succeeded)?;
        if output_refs.is_empty() {
            return Err(TransitionError::NoOutputs(self.id.clone()));
        }
        Ok(Job {
            status: JobStatus::Succeeded,
            output_refs,
            last_error: None,
            lease_expires_at: None,
            ..self.clone()
        })
    }

    /// RUNNING -> RETRYING, moving on to the next attempt.
    pub fn schedule_retry(
        &self,
        error: JobError,
        retry_at: DateTime<Utc>,
    ) -> Result<Job, TransitionError> {
        check(self, JobStatus::Retrying)?;
        if !self.has_attempts_left() {
            return Err(TransitionError::NoAttemptsLeft(self.id.clone()));
        }
        Ok(Job {
            status: JobStatus::Retrying,
            attempt: self.attempt + 1,
            last_error: Some(error),
            retry_at: Some(retry_at),
            lease_expires_at: None,
            ..self.clone()
        })
    }

    /// RUNNING -> FAILED.
    pub fn fail(&self, error: JobError) -> Result<Job, TransitionError> {
        check(self, JobStatus::Failed)?;
        Ok(Job {
            status: JobStatus::Failed,
            output_refs: Vec::new(),
            last_error: Some(error),
            retry_at: None,
            lease_expires_at: None,
            ..self.clone()
        })
    }

    /// RETRYING -> QUEUED once the backoff delay has elapsed.
    pub fn requeue(&self) -> Result<Job, TransitionError> {
        check(self, JobStatus::Queued)?;
        Ok(Job {
            status: JobStatus::Queued,
            retry_at: None,
            ..self.clone()
        })
    }

    /// Flag a non-terminal job for cooperative cancellation.
    pub fn request_cancel(&self) -> Result<Job, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.id.clone()));
        }
        Ok(Job {
            cancel_requested: true,
            ..self.clone()
        })
    }

    /// True if a RETRYING job's backoff has elapsed at `now`.
    pub fn retry_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Retrying && self.retry_at.is_none_or(|at| at <= now)
    }

    /// True if a RUNNING job's lease has run out at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running && self.lease_expires_at.is_none_or(|at| at <= now)
    }
}
