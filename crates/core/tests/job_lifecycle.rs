//! Job lifecycle integration tests.
//!
//! These tests run the real orchestrator, SQLite store and queue, and the
//! worker pool against mock capabilities:
//! QUEUED -> RUNNING -> {SUCCEEDED | RETRYING -> QUEUED ... | FAILED}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use doctrans_core::{
    engine::EngineConfig,
    queue::QueueConfig,
    testing::{fixtures, EngineStep, MockArtifactStore, MockEngine},
    worker::WorkerConfig,
    ArtifactGateway, CommandEngine, ErrorKind, Job, JobConfig, JobFilter, JobOrchestrator, JobStatus, JobStore,
    OrchestratorConfig, OrchestratorError, RetryPolicy, SqliteJobStore, SqliteWorkQueue,
    SubmitRequest, TranslationEngine, TranslationWorker, WorkQueue, WorkerPool,
};

const INPUT: &str = "uploads/paper.pdf";

/// Test helper to create all dependencies for lifecycle testing.
struct TestHarness {
    orchestrator: Arc<JobOrchestrator>,
    queue: Arc<SqliteWorkQueue>,
    artifacts: Arc<MockArtifactStore>,
    engine: MockEngine,
    _temp_dir: TempDir,
}

impl TestHarness {
    async fn new(config: OrchestratorConfig) -> Self {
        Self::with_queue(config, fixtures::queue_config()).await
    }

    async fn with_queue(config: OrchestratorConfig, queue_config: QueueConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let store = Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let queue = Arc::new(
            SqliteWorkQueue::new(&db_path, &queue_config).expect("Failed to create queue"),
        );
        let artifacts = Arc::new(MockArtifactStore::new());
        artifacts.insert(INPUT, fixtures::sample_pdf()).await;

        let orchestrator = Arc::new(JobOrchestrator::new(
            config,
            store as Arc<dyn JobStore>,
            Arc::clone(&queue) as Arc<dyn WorkQueue>,
            ArtifactGateway::new(
                artifacts.clone(),
                RetryPolicy::new(&fixtures::fast_retry()),
            ),
        ));

        Self {
            orchestrator,
            queue,
            artifacts,
            engine: MockEngine::new(),
            _temp_dir: temp_dir,
        }
    }

    fn create_pool(&self, config: WorkerConfig) -> WorkerPool {
        self.create_pool_with_engine(config, Arc::new(self.engine.clone()))
    }

    fn create_pool_with_engine(
        &self,
        config: WorkerConfig,
        engine: Arc<dyn TranslationEngine>,
    ) -> WorkerPool {
        let worker = TranslationWorker::new(
            config,
            engine,
            ArtifactGateway::new(
                self.artifacts.clone(),
                RetryPolicy::new(&fixtures::fast_retry()),
            ),
        );
        WorkerPool::new(worker, Arc::clone(&self.orchestrator))
    }

    async fn submit(&self) -> String {
        self.orchestrator
            .submit(SubmitRequest::new(INPUT, JobConfig::default()))
            .await
            .expect("Failed to submit job")
            .job
            .id
    }

    async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Job {
        let start = std::time::Instant::now();
        loop {
            let job = self
                .orchestrator
                .get_status(job_id)
                .await
                .expect("Failed to read job");
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                start.elapsed() < timeout,
                "job {} still {} after {:?}",
                job_id,
                job.status,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_two_failures_then_success() {
    let harness = TestHarness::new(fixtures::orchestrator_config(2)).await;
    harness.engine.push(EngineStep::Fail("crashed".to_string()));
    harness.engine.push(EngineStep::Fail("crashed again".to_string()));
    harness
        .engine
        .push(EngineStep::Produce(vec!["1.pdf".to_string()]));

    let pool = harness.create_pool(fixtures::worker_config(1));
    pool.start().await;

    let job_id = harness.submit().await;
    let job = harness
        .wait_for_terminal(&job_id, Duration::from_secs(10))
        .await;

    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 2);
    assert_eq!(job.output_refs, vec!["out/1.pdf"]);
    assert!(job.last_error.is_none());
    assert_eq!(harness.engine.call_count(), 3);
    assert!(harness.artifacts.object("out/1.pdf").await.is_some());

    assert_eq!(
        harness.orchestrator.fetch_result(&job_id).await.unwrap(),
        vec!["out/1.pdf"]
    );

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_failures_exhaust_attempts() {
    let harness = TestHarness::new(fixtures::orchestrator_config(1)).await;
    harness.engine.push(EngineStep::Fail("first".to_string()));
    harness.engine.push(EngineStep::Fail("second".to_string()));

    let pool = harness.create_pool(fixtures::worker_config(1));
    pool.start().await;

    let job_id = harness.submit().await;
    let job = harness
        .wait_for_terminal(&job_id, Duration::from_secs(10))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 1);
    assert!(job.output_refs.is_empty());
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::AttemptsExhausted);
    assert!(error.message.contains("second"));

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_nonexistent_input_is_rejected_without_record() {
    let harness = TestHarness::new(fixtures::orchestrator_config(2)).await;

    let result = harness
        .orchestrator
        .submit(SubmitRequest::new("uploads/missing.pdf", JobConfig::default()))
        .await;

    assert!(matches!(result, Err(OrchestratorError::InvalidInput(_))));
    let jobs = harness
        .orchestrator
        .list_jobs(&JobFilter::new())
        .await
        .unwrap();
    assert!(jobs.is_empty());
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unprocessable_input_fails_once() {
    let harness = TestHarness::new(fixtures::orchestrator_config(2)).await;
    harness
        .engine
        .push(EngineStep::Reject("encrypted document".to_string()));

    let pool = harness.create_pool(fixtures::worker_config(1));
    pool.start().await;

    let job_id = harness.submit().await;
    let job = harness
        .wait_for_terminal(&job_id, Duration::from_secs(10))
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 0);
    assert_eq!(job.last_error.unwrap().kind, ErrorKind::InvalidInput);
    assert_eq!(harness.engine.call_count(), 1);

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_timeout_is_retryable() {
    let harness = TestHarness::new(fixtures::orchestrator_config(0)).await;
    harness
        .engine
        .push(EngineStep::Stall(Duration::from_millis(2500)));

    let pool = harness.create_pool(fixtures::worker_config(1).with_execution_timeout(1));
    pool.start().await;

    let job_id = harness.submit().await;
    let job = harness
        .wait_for_terminal(&job_id, Duration::from_secs(10))
        .await;

    // No retries allowed, so the timeout exhausts the job.
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::AttemptsExhausted);
    assert!(error.message.contains("worker_timeout"));
    assert_eq!(pool.status().await.total_timed_out, 1);

    pool.stop(Duration::from_secs(5)).await;
}

/// Engine that logs "start", sleeps `secs`, then logs "end" to `marker`.
fn sleeping_engine(marker: &Path, secs: u64) -> Arc<dyn TranslationEngine> {
    let script = format!(
        r#"echo start >> "{0}"; sleep {1}; echo end >> "{0}""#,
        marker.display(),
        secs
    );
    Arc::new(CommandEngine::new(EngineConfig {
        command: PathBuf::from("sh"),
        args: vec![
            "-c".to_string(),
            script,
            "engine".to_string(),
            "{output_dir}".to_string(),
        ],
        unprocessable_exit_codes: vec![65],
        env: Default::default(),
    }))
}

fn marker_lines(marker: &Path) -> Vec<String> {
    std::fs::read_to_string(marker)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

#[tokio::test]
async fn test_timed_out_engine_process_is_killed() {
    let harness = TestHarness::new(fixtures::orchestrator_config(1)).await;
    let marker_dir = TempDir::new().unwrap();
    let marker = marker_dir.path().join("engine.log");

    let pool = harness.create_pool_with_engine(
        fixtures::worker_config(1).with_execution_timeout(1),
        sleeping_engine(&marker, 3),
    );
    pool.start().await;

    let job_id = harness.submit().await;
    let job = harness
        .wait_for_terminal(&job_id, Duration::from_secs(15))
        .await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(pool.status().await.total_timed_out, 2);

    // Long enough for any surviving engine to finish its script.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(marker_lines(&marker), vec!["start", "start"]);

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_stop_kills_engine_after_drain_timeout() {
    let harness = TestHarness::new(fixtures::orchestrator_config(1)).await;
    let marker_dir = TempDir::new().unwrap();
    let marker = marker_dir.path().join("engine.log");

    let pool =
        harness.create_pool_with_engine(fixtures::worker_config(1), sleeping_engine(&marker, 3));
    pool.start().await;

    let job_id = harness.submit().await;
    let start = std::time::Instant::now();
    while marker_lines(&marker).is_empty() {
        assert!(start.elapsed() < Duration::from_secs(5), "engine never started");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    pool.stop(Duration::from_millis(200)).await;
    assert!(!pool.status().await.is_responsive());

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(marker_lines(&marker), vec!["start"]);

    // The abandoned attempt is still RUNNING, waiting for the sweep.
    let job = harness.orchestrator.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn test_crashed_worker_is_reclaimed_by_sweep() {
    let mut config = fixtures::orchestrator_config(2);
    config.lease_timeout_secs = 0;
    let queue_config = QueueConfig {
        visibility_timeout_secs: 1,
        poll_interval_ms: 20,
    };
    let harness = TestHarness::with_queue(config, queue_config).await;
    let job_id = harness.submit().await;

    // A worker takes the delivery, starts the attempt, then dies silently.
    let lease = harness.queue.try_dequeue().await.unwrap().unwrap();
    assert_eq!(lease.job_id, job_id);
    let running = harness
        .orchestrator
        .begin_attempt(&job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running.status, JobStatus::Running);
    drop(lease);

    let report = harness.orchestrator.reconcile_once().await.unwrap();
    assert_eq!(report.lease_expired, 1);

    let reclaimed = harness.orchestrator.get_status(&job_id).await.unwrap();
    assert_eq!(reclaimed.status, JobStatus::Retrying);
    assert_eq!(reclaimed.attempt, 1);
    assert_eq!(reclaimed.last_error.unwrap().kind, ErrorKind::WorkerLost);

    // A healthy pool picks the retry up once the dead lease runs out.
    let pool = harness.create_pool(fixtures::worker_config(1));
    pool.start().await;

    let job = harness
        .wait_for_terminal(&job_id, Duration::from_secs(10))
        .await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.output_refs, vec!["out/translated.pdf"]);
    assert_eq!(harness.engine.call_count(), 1);

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_cancel_before_start_skips_engine() {
    let harness = TestHarness::new(fixtures::orchestrator_config(2)).await;
    let job_id = harness.submit().await;

    let flagged = harness.orchestrator.cancel(&job_id).await.unwrap();
    assert!(flagged.cancel_requested);
    assert_eq!(flagged.status, JobStatus::Queued);

    let pool = harness.create_pool(fixtures::worker_config(1));
    pool.start().await;

    let job = harness
        .wait_for_terminal(&job_id, Duration::from_secs(10))
        .await;
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(error.message, "cancelled by request");
    assert_eq!(harness.engine.call_count(), 0);

    pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_pool_runs_each_job_once() {
    let harness = TestHarness::new(fixtures::orchestrator_config(2)).await;
    for _ in 0..4 {
        harness
            .engine
            .push(EngineStep::Stall(Duration::from_millis(100)));
    }

    let pool = harness.create_pool(fixtures::worker_config(2));
    pool.start().await;

    let mut job_ids = Vec::new();
    for _ in 0..4 {
        job_ids.push(harness.submit().await);
    }

    for job_id in &job_ids {
        let job = harness
            .wait_for_terminal(job_id, Duration::from_secs(10))
            .await;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempt, 0);
    }
    assert_eq!(harness.engine.call_count(), 4);

    let status = pool.status().await;
    assert_eq!(status.concurrency, 2);
    assert_eq!(status.total_completed, 4);
    assert!(status.is_responsive());

    pool.stop(Duration::from_secs(5)).await;
    assert!(!pool.status().await.is_responsive());
}
