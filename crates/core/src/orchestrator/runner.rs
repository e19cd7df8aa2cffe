//! Job orchestrator implementation.
//!
//! Owns the job lifecycle:
//! - Intake: validate, persist as QUEUED, then enqueue
//! - Attempts: move a delivered job to RUNNING under a lease
//! - Results: apply worker outcomes with compare-and-set, schedule retries
//! - Reconciliation: periodic repair of lost workers and missing queue messages

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::artifact::{validate_key, ArtifactError, ArtifactGateway};
use crate::job::{
    ErrorClass, ErrorKind, Job, JobError, JobFilter, JobProgress, JobStatus, JobStore,
    JobStoreError, TransitionError,
};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::worker::AttemptMonitor;

use super::config::OrchestratorConfig;
use super::types::{
    OrchestratorError, OrchestratorStatus, ResultDisposition, Submission, SubmitRequest,
    SweepReport, WorkerOutcome,
};

/// Compare-and-set retries before giving up on a contended job.
const MAX_CAS_RETRIES: usize = 8;

/// Jobs examined per state in one sweep pass.
const SWEEP_BATCH: i64 = 500;

/// Longest accepted client reference.
const MAX_CLIENT_REF_LEN: usize = 256;

/// The job orchestrator. Every method is safe to call concurrently from API
/// handlers and pool slots; no job state is held in memory between calls.
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    artifacts: ArtifactGateway,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        artifacts: ArtifactGateway,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            store,
            queue,
            artifacts,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    /// Start the reconciliation sweep.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }

        info!("Starting job orchestrator");
        self.spawn_sweep_loop();
    }

    /// Stop the reconciliation sweep.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Orchestrator not running");
            return;
        }

        info!("Stopping job orchestrator");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Intake and queries
    // =========================================================================

    /// Validate and persist a new job, then enqueue it.
    ///
    /// The record is written before the queue message; if enqueue fails the
    /// job stays QUEUED and the sweep enqueues it later.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Submission, OrchestratorError> {
        if let Err(e) = self.validate_submission(&request).await {
            metrics::JOBS_SUBMITTED.with_label_values(&["rejected"]).inc();
            return Err(e);
        }

        if let Some(existing) = self.find_duplicate(&request).await? {
            info!(
                "Submission for {} matches job {} ({}), not creating a new one",
                request.input_ref, existing.id, existing.status
            );
            metrics::JOBS_SUBMITTED
                .with_label_values(&["deduplicated"])
                .inc();
            return Ok(Submission {
                job: existing,
                deduplicated: true,
            });
        }

        let job = Job::new(request.input_ref, request.config, self.config.max_attempts)
            .with_priority(request.priority)
            .with_client_ref(request.client_ref);
        let job = self.store.create(&job).await?;

        if let Err(e) = self.queue.enqueue(&job.id, Utc::now(), job.priority).await {
            warn!(
                "Job {} persisted but enqueue failed, sweep will retry: {}",
                job.id, e
            );
        }

        info!(
            "Submitted job {} for {} ({} -> {}, {})",
            job.id,
            job.input_ref,
            job.config.source_lang,
            job.config.target_lang,
            job.config.mode.as_str()
        );
        metrics::JOBS_SUBMITTED.with_label_values(&["created"]).inc();

        Ok(Submission {
            job,
            deduplicated: false,
        })
    }

    async fn validate_submission(&self, request: &SubmitRequest) -> Result<(), OrchestratorError> {
        validate_key(&request.input_ref).map_err(|_| {
            OrchestratorError::InvalidInput(format!(
                "input_ref is not a valid store key: {:?}",
                request.input_ref
            ))
        })?;

        request
            .config
            .validate()
            .map_err(OrchestratorError::InvalidInput)?;

        if let Some(ref client_ref) = request.client_ref {
            if client_ref.trim().is_empty() || client_ref.len() > MAX_CLIENT_REF_LEN {
                return Err(OrchestratorError::InvalidInput(
                    "client_ref must be 1-256 characters".to_string(),
                ));
            }
        }

        match self.artifacts.exists(&request.input_ref).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(ArtifactError::NotFound { .. }) => Err(
                OrchestratorError::InvalidInput(format!("input not found: {}", request.input_ref)),
            ),
            Err(ArtifactError::InvalidKey { key }) => Err(OrchestratorError::InvalidInput(
                format!("input_ref is not a valid store key: {:?}", key),
            )),
            Err(ArtifactError::PermissionDenied { key }) => Err(
                OrchestratorError::InvalidInput(format!("input not readable: {}", key)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// An earlier, not failed, job with the same client reference and request.
    async fn find_duplicate(
        &self,
        request: &SubmitRequest,
    ) -> Result<Option<Job>, OrchestratorError> {
        let Some(ref client_ref) = request.client_ref else {
            return Ok(None);
        };

        let candidates = self
            .store
            .list(&JobFilter::new().with_client_ref(client_ref.clone()).with_limit(50))
            .await?;

        Ok(candidates.into_iter().find(|job| {
            job.status != JobStatus::Failed
                && job.input_ref == request.input_ref
                && job.config == request.config
        }))
    }

    /// Current snapshot of a job. Reads only the store.
    pub async fn get_status(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    /// Output references of a succeeded job.
    pub async fn fetch_result(&self, job_id: &str) -> Result<Vec<String>, OrchestratorError> {
        let job = self.get_status(job_id).await?;
        if job.status == JobStatus::Succeeded {
            Ok(job.output_refs)
        } else {
            Err(OrchestratorError::NotReady {
                job_id: job.id,
                status: job.status,
            })
        }
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn count_jobs(&self, filter: &JobFilter) -> Result<i64, OrchestratorError> {
        Ok(self.store.count(filter).await?)
    }

    /// Request cooperative cancellation. The worker checks the flag before
    /// invoking the engine; a result arriving after the flag is set is
    /// discarded and the job fails as cancelled.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        for _ in 0..MAX_CAS_RETRIES {
            let job = self.get_status(job_id).await?;
            if job.cancel_requested {
                return Ok(job);
            }

            let next = job.request_cancel().map_err(|_| OrchestratorError::InvalidState {
                job_id: job.id.clone(),
                status: job.status,
                operation: "cancel".to_string(),
            })?;

            match self.store.compare_and_set(&next).await {
                Ok(stored) => {
                    info!("Cancellation requested for job {} ({})", stored.id, stored.status);
                    return Ok(stored);
                }
                Err(JobStoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::Contended(job_id.to_string()))
    }

    // =========================================================================
    // Attempts and results
    // =========================================================================

    /// Move a delivered job to RUNNING. Returns `None` when the delivery
    /// should be acknowledged without running anything: the job is unknown,
    /// terminal, already running, or its backoff has not elapsed.
    pub async fn begin_attempt(&self, job_id: &str) -> Result<Option<Job>, OrchestratorError> {
        for _ in 0..MAX_CAS_RETRIES {
            let Some(job) = self.store.get(job_id).await? else {
                warn!("Delivered job {} does not exist", job_id);
                return Ok(None);
            };
            let now = Utc::now();

            let queued = match job.status {
                JobStatus::Queued => job,
                JobStatus::Retrying if job.retry_due(now) => {
                    match self.store.compare_and_set(&job.requeue()?).await {
                        Ok(stored) => stored,
                        Err(JobStoreError::Conflict { .. }) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                status => {
                    debug!("Skipping delivery of job {} in status {}", job_id, status);
                    return Ok(None);
                }
            };

            let lease_expires_at =
                now + chrono::Duration::seconds(self.config.lease_timeout_secs as i64);
            match self.store.compare_and_set(&queued.start(lease_expires_at)?).await {
                Ok(running) => {
                    info!(
                        "Job {} attempt {}/{} started",
                        running.id,
                        running.attempt + 1,
                        running.max_attempts + 1
                    );
                    return Ok(Some(running));
                }
                Err(JobStoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::Contended(job_id.to_string()))
    }

    /// Apply the outcome of attempt `attempt` of `job_id`.
    ///
    /// Results are keyed on `(job_id, attempt)`: anything not matching the
    /// job's current RUNNING attempt is ignored, so redeliveries and slow
    /// superseded workers never overwrite newer state.
    pub async fn on_worker_result(
        &self,
        job_id: &str,
        attempt: u32,
        outcome: WorkerOutcome,
    ) -> Result<ResultDisposition, OrchestratorError> {
        for _ in 0..MAX_CAS_RETRIES {
            let job = self.get_status(job_id).await?;

            if job.status != JobStatus::Running || job.attempt != attempt {
                if job.status == JobStatus::Succeeded
                    && job.attempt == attempt
                    && outcome.is_success()
                {
                    debug!("Duplicate success for job {} attempt {}", job_id, attempt);
                    metrics::RESULTS_DISCARDED
                        .with_label_values(&["duplicate"])
                        .inc();
                    return Ok(ResultDisposition::Duplicate);
                }
                warn!(
                    "Ignoring stale result for job {} attempt {} (job is {} at attempt {})",
                    job_id, attempt, job.status, job.attempt
                );
                metrics::RESULTS_DISCARDED.with_label_values(&["stale"]).inc();
                return Ok(ResultDisposition::Stale);
            }

            let next = self.resolve(&job, &outcome)?;
            match self.store.compare_and_set(&next).await {
                Ok(stored) => {
                    self.after_transition(&stored, &outcome).await;
                    return Ok(ResultDisposition::Applied(stored));
                }
                Err(JobStoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::Contended(job_id.to_string()))
    }

    /// Record engine progress for attempt `attempt` of `job_id`.
    ///
    /// Returns `false` without writing when the job has left RUNNING or
    /// moved on to another attempt.
    pub async fn record_progress(
        &self,
        job_id: &str,
        attempt: u32,
        progress: JobProgress,
    ) -> Result<bool, OrchestratorError> {
        for _ in 0..MAX_CAS_RETRIES {
            let job = self.get_status(job_id).await?;
            if job.status != JobStatus::Running || job.attempt != attempt {
                debug!(
                    "Dropping progress for job {} attempt {} (job is {} at attempt {})",
                    job_id, attempt, job.status, job.attempt
                );
                return Ok(false);
            }

            match self.store.compare_and_set(&job.record_progress(progress)?).await {
                Ok(_) => return Ok(true),
                Err(JobStoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::Contended(job_id.to_string()))
    }

    /// Next record for a RUNNING job given an attempt outcome.
    fn resolve(&self, job: &Job, outcome: &WorkerOutcome) -> Result<Job, TransitionError> {
        if job.cancel_requested {
            return job.fail(JobError::new(ErrorKind::Cancelled, "cancelled by request"));
        }

        match outcome {
            WorkerOutcome::Succeeded { output_refs } if !output_refs.is_empty() => {
                job.succeed(output_refs.clone())
            }
            WorkerOutcome::Succeeded { .. } => self.resolve_failure(
                job,
                ErrorKind::EngineFailure,
                ErrorClass::Retryable,
                "engine produced no output",
            ),
            WorkerOutcome::Failed {
                kind,
                class,
                detail,
            } => self.resolve_failure(job, *kind, *class, detail),
        }
    }

    fn resolve_failure(
        &self,
        job: &Job,
        kind: ErrorKind,
        class: ErrorClass,
        detail: &str,
    ) -> Result<Job, TransitionError> {
        match class {
            ErrorClass::Retryable if job.has_attempts_left() => {
                let delay = self.config.retry_delay(job.attempt);
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                job.schedule_retry(JobError::new(kind, detail), retry_at)
            }
            ErrorClass::Retryable => job.fail(JobError::new(
                ErrorKind::AttemptsExhausted,
                format!(
                    "gave up after {} attempts; last error ({}): {}",
                    job.attempt + 1,
                    kind,
                    detail
                ),
            )),
            ErrorClass::Fatal => job.fail(JobError::new(kind, detail)),
        }
    }

    async fn after_transition(&self, job: &Job, outcome: &WorkerOutcome) {
        match job.status {
            JobStatus::Retrying => {
                let retry_at = job.retry_at.unwrap_or_else(Utc::now);
                let kind = job.last_error.as_ref().map_or("unknown", |e| e.kind.as_str());
                warn!(
                    "Job {} attempt {} failed ({}), retry {}/{} at {}",
                    job.id,
                    job.attempt,
                    outcome.label(),
                    job.attempt,
                    job.max_attempts,
                    retry_at
                );
                metrics::RETRIES_SCHEDULED.with_label_values(&[kind]).inc();
                if let Err(e) = self.queue.enqueue(&job.id, retry_at, job.priority).await {
                    warn!(
                        "Failed to enqueue retry of job {}, sweep will retry: {}",
                        job.id, e
                    );
                }
            }
            JobStatus::Succeeded => {
                info!(
                    "Job {} succeeded with {} output(s)",
                    job.id,
                    job.output_refs.len()
                );
                metrics::JOBS_FINISHED
                    .with_label_values(&["succeeded", ""])
                    .inc();
            }
            JobStatus::Failed => {
                let (kind, message) = job
                    .last_error
                    .as_ref()
                    .map_or(("unknown", ""), |e| (e.kind.as_str(), e.message.as_str()));
                error!("Job {} failed ({}): {}", job.id, kind, message);
                metrics::JOBS_FINISHED
                    .with_label_values(&["failed", kind])
                    .inc();
            }
            JobStatus::Queued | JobStatus::Running => {}
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// One reconciliation pass:
    /// - RUNNING past its lease is fed back as a retryable `WorkerLost` failure
    /// - RETRYING past its backoff (plus grace) goes back to QUEUED
    /// - QUEUED (older than the grace period) with no queue message is enqueued
    pub async fn reconcile_once(&self) -> Result<SweepReport, OrchestratorError> {
        let now = Utc::now();
        let grace = chrono::Duration::seconds(self.config.requeue_grace_secs as i64);
        let mut report = SweepReport::default();

        let running = self
            .store
            .list(&JobFilter::new().with_status(JobStatus::Running).with_limit(SWEEP_BATCH))
            .await?;
        for job in running.into_iter().filter(|j| j.lease_expired(now)) {
            warn!(
                "Job {} attempt {} lease expired, treating worker as lost",
                job.id, job.attempt
            );
            let outcome = WorkerOutcome::retryable(
                ErrorKind::WorkerLost,
                "worker stopped reporting before its lease expired",
            );
            match self.on_worker_result(&job.id, job.attempt, outcome).await {
                Ok(ResultDisposition::Applied(_)) => {
                    report.lease_expired += 1;
                    metrics::SWEEP_REPAIRS
                        .with_label_values(&["lease_expired"])
                        .inc();
                }
                Ok(_) => {}
                Err(e) => warn!("Sweep could not reclaim job {}: {}", job.id, e),
            }
        }

        let retrying = self
            .store
            .list(&JobFilter::new().with_status(JobStatus::Retrying).with_limit(SWEEP_BATCH))
            .await?;
        for job in retrying.into_iter().filter(|j| j.retry_due(now - grace)) {
            match self.store.compare_and_set(&job.requeue()?).await {
                Ok(queued) => {
                    debug!("Sweep moved job {} back to QUEUED", queued.id);
                    report.requeued += 1;
                    metrics::SWEEP_REPAIRS.with_label_values(&["requeued"]).inc();
                    self.ensure_enqueued(&queued).await;
                }
                Err(JobStoreError::Conflict { .. }) => {}
                Err(e) => warn!("Sweep could not requeue job {}: {}", job.id, e),
            }
        }

        let queued = self
            .store
            .list(&JobFilter::new().with_status(JobStatus::Queued).with_limit(SWEEP_BATCH))
            .await?;
        for job in queued.into_iter().filter(|j| j.updated_at <= now - grace) {
            if self.ensure_enqueued(&job).await {
                report.reenqueued += 1;
                metrics::SWEEP_REPAIRS
                    .with_label_values(&["reenqueued"])
                    .inc();
            }
        }

        Ok(report)
    }

    /// Enqueue `job` if it has no queue message. Returns true if it enqueued.
    async fn ensure_enqueued(&self, job: &Job) -> bool {
        match self.queue.contains(&job.id).await {
            Ok(true) => false,
            Ok(false) => match self.queue.enqueue(&job.id, Utc::now(), job.priority).await {
                Ok(()) => {
                    info!("Re-enqueued job {} with no queue message", job.id);
                    true
                }
                Err(e) => {
                    warn!("Failed to re-enqueue job {}: {}", job.id, e);
                    false
                }
            },
            Err(e) => {
                warn!("Failed to check queue for job {}: {}", job.id, e);
                false
            }
        }
    }

    /// Spawn the periodic reconciliation sweep.
    fn spawn_sweep_loop(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Reconciliation sweep started (every {:?})", interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reconciliation sweep received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !orchestrator.running.load(Ordering::Relaxed) {
                            break;
                        }
                        match orchestrator.reconcile_once().await {
                            Ok(report) if !report.is_empty() => info!(
                                "Sweep repaired jobs: {} lease expired, {} requeued, {} re-enqueued",
                                report.lease_expired, report.requeued, report.reenqueued
                            ),
                            Ok(_) => debug!("Sweep found nothing to repair"),
                            Err(e) => warn!("Reconciliation sweep error: {}", e),
                        }
                    }
                }
            }
            info!("Reconciliation sweep stopped");
        });
    }

    /// Get current orchestrator status.
    pub async fn status(&self) -> OrchestratorStatus {
        let count = |status: JobStatus| {
            let store = Arc::clone(&self.store);
            async move {
                store
                    .count(&JobFilter::new().with_status(status))
                    .await
                    .unwrap_or(0)
            }
        };

        OrchestratorStatus {
            running: self.is_running(),
            queued: count(JobStatus::Queued).await,
            running_jobs: count(JobStatus::Running).await,
            retrying: count(JobStatus::Retrying).await,
            succeeded: count(JobStatus::Succeeded).await,
            failed: count(JobStatus::Failed).await,
            queue_depth: self.queue.depth().await.unwrap_or(0),
        }
    }
}

#[async_trait]
impl AttemptMonitor for JobOrchestrator {
    async fn is_cancelled(&self, job_id: &str) -> bool {
        match self.store.get(job_id).await {
            Ok(Some(job)) => job.cancel_requested,
            Ok(None) => false,
            Err(e) => {
                warn!("Could not read cancel flag of job {}: {}", job_id, e);
                false
            }
        }
    }

    async fn on_progress(&self, job_id: &str, attempt: u32, progress: JobProgress) {
        if let Err(e) = self.record_progress(job_id, attempt, progress).await {
            warn!(
                "Could not record progress of job {} attempt {}: {}",
                job_id, attempt, e
            );
        }
    }
}
