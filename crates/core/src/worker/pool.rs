//! Fixed-size pool of execution slots.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::translate::TranslationWorker;
use crate::job::ErrorKind;
use crate::metrics;
use crate::orchestrator::{JobOrchestrator, WorkerOutcome};
use crate::queue::{Lease, WorkQueue};

/// Pause after a failed dequeue before trying again.
const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What one slot is doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Idle,
    Busy {
        job_id: String,
        attempt: u32,
        since: DateTime<Utc>,
    },
    Stopped,
}

/// Counters shared by all slots.
#[derive(Debug, Default)]
struct PoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub running: bool,
    pub concurrency: usize,
    pub busy_slots: usize,
    pub slots: Vec<SlotState>,
    /// Attempts that produced outputs.
    pub total_completed: u64,
    /// Attempts that reported a failure, timeouts included.
    pub total_failed: u64,
    pub total_timed_out: u64,
}

impl PoolStatus {
    /// At least one slot is able to take work.
    pub fn is_responsive(&self) -> bool {
        self.running && self.slots.iter().any(|s| !matches!(s, SlotState::Stopped))
    }
}

/// A fixed set of slots, each running one job at a time:
/// dequeue, begin the attempt, execute under a hard timeout, report the
/// outcome, acknowledge the delivery.
///
/// The slot count is the only throttle. A delivery whose outcome could not
/// be recorded is left unacknowledged and comes back after the visibility
/// timeout.
pub struct WorkerPool {
    concurrency: usize,
    execution_timeout: Duration,
    worker: Arc<TranslationWorker>,
    orchestrator: Arc<JobOrchestrator>,
    slots: Arc<RwLock<Vec<SlotState>>>,
    stats: Arc<PoolStats>,
    handles: Mutex<Vec<JoinHandle<()>>>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    pub fn new(worker: TranslationWorker, orchestrator: Arc<JobOrchestrator>) -> Self {
        let concurrency = worker.config().concurrency.max(1);
        let execution_timeout = Duration::from_secs(worker.config().execution_timeout_secs);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            concurrency,
            execution_timeout,
            worker: Arc::new(worker),
            orchestrator,
            slots: Arc::new(RwLock::new(vec![SlotState::Stopped; concurrency])),
            stats: Arc::new(PoolStats::default()),
            handles: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Spawn the slots.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        info!(
            "Starting worker pool with {} slot(s), engine {}, timeout {:?}",
            self.concurrency,
            self.worker.engine_name(),
            self.execution_timeout
        );

        let mut handles = self.handles.lock().await;
        for index in 0..self.concurrency {
            let slot = Slot {
                index,
                execution_timeout: self.execution_timeout,
                worker: Arc::clone(&self.worker),
                orchestrator: Arc::clone(&self.orchestrator),
                queue: Arc::clone(self.orchestrator.queue()),
                slots: Arc::clone(&self.slots),
                stats: Arc::clone(&self.stats),
            };
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(slot.run(shutdown_rx)));
        }
    }

    /// Stop taking new work and wait up to `drain` for in-flight attempts.
    ///
    /// Slots still busy after `drain` are aborted. Dropping an attempt kills
    /// its engine process; the job stays RUNNING until the lease runs out and
    /// the sweep schedules a retry.
    pub async fn stop(&self, drain: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Worker pool not running");
            return;
        }

        info!("Stopping worker pool");
        let _ = self.shutdown_tx.send(());

        let mut handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        let wait = futures::future::join_all(handles.iter_mut());
        if tokio::time::timeout(drain, wait).await.is_err() {
            warn!(
                "Worker pool did not drain within {:?}, aborting busy slots",
                drain
            );
            for handle in &handles {
                handle.abort();
            }
            for handle in handles {
                let _ = handle.await;
            }
            for slot in self.slots.write().await.iter_mut() {
                *slot = SlotState::Stopped;
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn status(&self) -> PoolStatus {
        let slots = self.slots.read().await.clone();
        PoolStatus {
            running: self.is_running(),
            concurrency: self.concurrency,
            busy_slots: slots
                .iter()
                .filter(|s| matches!(s, SlotState::Busy { .. }))
                .count(),
            slots,
            total_completed: self.stats.completed.load(Ordering::Relaxed),
            total_failed: self.stats.failed.load(Ordering::Relaxed),
            total_timed_out: self.stats.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Everything one slot task owns.
struct Slot {
    index: usize,
    execution_timeout: Duration,
    worker: Arc<TranslationWorker>,
    orchestrator: Arc<JobOrchestrator>,
    queue: Arc<dyn WorkQueue>,
    slots: Arc<RwLock<Vec<SlotState>>>,
    stats: Arc<PoolStats>,
}

impl Slot {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Slot {} started", self.index);
        self.set_state(SlotState::Idle).await;

        loop {
            let lease = tokio::select! {
                _ = shutdown_rx.recv() => break,
                lease = self.queue.dequeue() => lease,
            };

            match lease {
                Ok(lease) => self.process(lease).await,
                Err(e) => {
                    warn!("Slot {} dequeue failed: {}", self.index, e);
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(DEQUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        self.set_state(SlotState::Stopped).await;
        debug!("Slot {} stopped", self.index);
    }

    async fn process(&self, lease: Lease) {
        let job = match self.orchestrator.begin_attempt(&lease.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                metrics::DELIVERIES_SKIPPED.inc();
                self.ack(&lease).await;
                return;
            }
            Err(e) => {
                warn!(
                    "Could not start job {} (delivery {}), leaving it for redelivery: {}",
                    lease.job_id, lease.delivery_count, e
                );
                return;
            }
        };

        self.set_state(SlotState::Busy {
            job_id: job.id.clone(),
            attempt: job.attempt,
            since: Utc::now(),
        })
        .await;

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.execution_timeout,
            self.worker.execute(&job, self.orchestrator.as_ref()),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                WorkerOutcome::retryable(
                    ErrorKind::WorkerTimeout,
                    format!(
                        "attempt exceeded {}s execution timeout",
                        self.execution_timeout.as_secs()
                    ),
                )
            }
        };

        let label = outcome.label();
        metrics::ATTEMPTS_TOTAL.with_label_values(&[label]).inc();
        metrics::ATTEMPT_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        if outcome.is_success() {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            "Job {} attempt {} finished in {:?}: {}",
            job.id,
            job.attempt,
            started.elapsed(),
            label
        );

        match self
            .orchestrator
            .on_worker_result(&job.id, job.attempt, outcome)
            .await
        {
            Ok(_) => self.ack(&lease).await,
            Err(e) => error!(
                "Could not record result of job {} attempt {}, leaving it for redelivery: {}",
                job.id, job.attempt, e
            ),
        }

        self.set_state(SlotState::Idle).await;
    }

    async fn ack(&self, lease: &Lease) {
        match self.queue.ack(lease).await {
            Ok(true) => {}
            Ok(false) => debug!(
                "Lease on job {} expired before ack, message was redelivered",
                lease.job_id
            ),
            Err(e) => warn!("Failed to ack job {}: {}", lease.job_id, e),
        }
    }

    async fn set_state(&self, state: SlotState) {
        if let Some(slot) = self.slots.write().await.get_mut(self.index) {
            *slot = state;
        }
    }
}
