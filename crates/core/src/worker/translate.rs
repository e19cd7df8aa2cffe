//! Execution of one attempt of one job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use crate::artifact::{ArtifactError, ArtifactGateway};
use crate::engine::{EngineError, TranslationEngine};
use crate::job::{ErrorClass, ErrorKind, Job, JobProgress};
use crate::orchestrator::WorkerOutcome;

/// Staged input name when the input reference has no usable file name.
const DEFAULT_INPUT_NAME: &str = "input.pdf";

/// Smallest move in percent worth writing to the job record.
const PROGRESS_STEP_PERCENT: f64 = 2.0;

/// Engine progress updates buffered between the engine and the worker.
const PROGRESS_BUFFER: usize = 32;

/// What an attempt reports to, and asks of, the job's owner.
#[async_trait]
pub trait AttemptMonitor: Send + Sync {
    /// Whether the job has been asked to stop.
    async fn is_cancelled(&self, job_id: &str) -> bool;

    /// Engine progress of attempt `attempt`. Best effort.
    async fn on_progress(&self, job_id: &str, attempt: u32, progress: JobProgress);
}

/// Runs one attempt: stage the input, invoke the engine, publish outputs.
///
/// Every attempt gets its own staging directory, owned by the attempt and
/// deleted when it ends. An attempt abandoned on timeout is dropped, which
/// stops the engine and removes the directory.
pub struct TranslationWorker {
    config: WorkerConfig,
    engine: Arc<dyn TranslationEngine>,
    artifacts: ArtifactGateway,
}

impl TranslationWorker {
    pub fn new(
        config: WorkerConfig,
        engine: Arc<dyn TranslationEngine>,
        artifacts: ArtifactGateway,
    ) -> Self {
        Self {
            config,
            engine,
            artifacts,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Execute the current attempt of `job`. Never fails: every problem is
    /// classified into a [`WorkerOutcome`].
    pub async fn execute(&self, job: &Job, monitor: &dyn AttemptMonitor) -> WorkerOutcome {
        match self.run(job, monitor).await {
            Ok(output_refs) => WorkerOutcome::succeeded(output_refs),
            Err(outcome) => outcome,
        }
    }

    async fn run(
        &self,
        job: &Job,
        monitor: &dyn AttemptMonitor,
    ) -> Result<Vec<String>, WorkerOutcome> {
        let input = self
            .artifacts
            .fetch(&job.input_ref)
            .await
            .map_err(|e| fetch_failure(&job.input_ref, e))?;
        self.check_input(&input)?;

        let staging = self.staging_dir(job)?;
        let input_path = staging.path().join(input_file_name(&job.input_ref));
        let output_dir = staging.path().join("out");
        stage(&input_path, &input, &output_dir).map_err(|e| {
            WorkerOutcome::retryable(
                ErrorKind::EngineFailure,
                format!("failed to stage input: {}", e),
            )
        })?;
        debug!(
            "Staged {} ({} bytes) for job {} in {}",
            job.input_ref,
            input.len(),
            job.id,
            staging.path().display()
        );

        if monitor.is_cancelled(&job.id).await {
            info!("Job {} cancelled before engine start", job.id);
            return Err(WorkerOutcome::fatal(
                ErrorKind::Cancelled,
                "cancelled by request",
            ));
        }

        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_BUFFER);
        let mut translation = self.engine.translate_with_progress(
            &input_path,
            &job.config,
            &output_dir,
            progress_tx,
        );
        let mut reporter = ProgressReporter::default();
        let result = loop {
            tokio::select! {
                result = &mut translation => break result,
                Some(progress) = progress_rx.recv() => {
                    reporter.report(job, progress, monitor).await;
                }
            }
        };
        while let Ok(progress) = progress_rx.try_recv() {
            reporter.report(job, progress, monitor).await;
        }

        let result = match result {
            Ok(paths) => read_outputs(&paths).await,
            Err(e) => Err(e),
        };
        drop(staging);

        let outputs = result.map_err(engine_failure)?;
        if outputs.is_empty() {
            return Err(WorkerOutcome::retryable(
                ErrorKind::EngineFailure,
                "engine produced no output",
            ));
        }

        let mut output_refs = Vec::with_capacity(outputs.len());
        for (file_name, bytes) in outputs {
            let key = self.config.output_key(&job.id, job.attempt, &file_name);
            let reference = self
                .artifacts
                .put(&key, &bytes)
                .await
                .map_err(|e| upload_failure(&key, e))?;
            debug!("Uploaded {} ({} bytes)", reference, bytes.len());
            output_refs.push(reference);
        }

        Ok(output_refs)
    }

    fn check_input(&self, input: &[u8]) -> Result<(), WorkerOutcome> {
        if input.len() as u64 > self.config.max_input_bytes {
            return Err(WorkerOutcome::fatal(
                ErrorKind::InvalidInput,
                format!(
                    "input is {} bytes, limit is {}",
                    input.len(),
                    self.config.max_input_bytes
                ),
            ));
        }
        if !input.starts_with(self.config.input_magic.as_bytes()) {
            return Err(WorkerOutcome::fatal(
                ErrorKind::InvalidInput,
                "input is not a supported document",
            ));
        }
        Ok(())
    }

    fn staging_dir(&self, job: &Job) -> Result<tempfile::TempDir, WorkerOutcome> {
        let prefix = format!("doctrans-{}-{}-", job.id, job.attempt);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match self.config.staging_dir {
            Some(ref parent) => std::fs::create_dir_all(parent)
                .and_then(|_| builder.tempdir_in(parent)),
            None => builder.tempdir(),
        };
        dir.map_err(|e| {
            WorkerOutcome::retryable(
                ErrorKind::EngineFailure,
                format!("failed to create staging directory: {}", e),
            )
        })
    }
}

fn input_file_name(input_ref: &str) -> String {
    Path::new(input_ref)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string())
}

fn stage(input_path: &Path, input: &[u8], output_dir: &Path) -> std::io::Result<()> {
    std::fs::write(input_path, input)?;
    std::fs::create_dir(output_dir)
}

/// Read produced files into memory so staging can be removed right away.
async fn read_outputs(paths: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>, EngineError> {
    let mut outputs = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| EngineError::failed(format!("bad output path {}", path.display())))?;
        outputs.push((name, tokio::fs::read(path).await?));
    }
    Ok(outputs)
}

/// Forwards progress that moved by at least [`PROGRESS_STEP_PERCENT`],
/// plus completion.
#[derive(Debug, Default)]
struct ProgressReporter {
    last_percent: Option<f64>,
}

impl ProgressReporter {
    fn should_report(&self, progress: &JobProgress) -> bool {
        self.last_percent.is_none_or(|last| {
            progress.percent - last >= PROGRESS_STEP_PERCENT
                || (progress.is_complete() && last < 100.0)
        })
    }

    async fn report(&mut self, job: &Job, progress: JobProgress, monitor: &dyn AttemptMonitor) {
        if self.should_report(&progress) {
            self.last_percent = Some(progress.percent);
            monitor.on_progress(&job.id, job.attempt, progress).await;
        }
    }
}

fn fetch_failure(key: &str, error: ArtifactError) -> WorkerOutcome {
    match error {
        ArtifactError::NotFound { .. }
        | ArtifactError::InvalidKey { .. }
        | ArtifactError::PermissionDenied { .. } => {
            WorkerOutcome::fatal(ErrorKind::InvalidInput, format!("cannot read input: {}", error))
        }
        ArtifactError::Unavailable { .. } => WorkerOutcome::retryable(
            ErrorKind::TransientStoreError,
            format!("fetching {}: {}", key, error),
        ),
        ArtifactError::Backend { .. } => WorkerOutcome::retryable(
            ErrorKind::StorageError,
            format!("fetching {}: {}", key, error),
        ),
    }
}

fn upload_failure(key: &str, error: ArtifactError) -> WorkerOutcome {
    warn!("Upload of {} failed: {}", key, error);
    match error {
        ArtifactError::Unavailable { .. } => WorkerOutcome::retryable(
            ErrorKind::TransientStoreError,
            format!("uploading {}: {}", key, error),
        ),
        ArtifactError::Backend { .. } => WorkerOutcome::retryable(
            ErrorKind::StorageError,
            format!("uploading {}: {}", key, error),
        ),
        ArtifactError::NotFound { .. }
        | ArtifactError::InvalidKey { .. }
        | ArtifactError::PermissionDenied { .. } => WorkerOutcome::fatal(
            ErrorKind::StorageError,
            format!("uploading {}: {}", key, error),
        ),
    }
}

fn engine_failure(error: EngineError) -> WorkerOutcome {
    let class = error.class();
    let detail = error.to_string();
    match class {
        ErrorClass::Fatal => WorkerOutcome::fatal(ErrorKind::InvalidInput, detail),
        ErrorClass::Retryable => WorkerOutcome::retryable(ErrorKind::EngineFailure, detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::job::JobConfig;
    use crate::retry::RetryPolicy;
    use crate::testing::{fixtures, EngineStep, MockArtifactStore, MockEngine};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Flag {
        cancelled: AtomicBool,
        progress: Mutex<Vec<(u32, f64)>>,
    }

    #[async_trait]
    impl AttemptMonitor for Flag {
        async fn is_cancelled(&self, _job_id: &str) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        async fn on_progress(&self, _job_id: &str, attempt: u32, progress: JobProgress) {
            self.progress.lock().unwrap().push((attempt, progress.percent));
        }
    }

    fn not_cancelled() -> Flag {
        Flag::default()
    }

    async fn setup() -> (Arc<MockArtifactStore>, MockEngine, TranslationWorker, Job) {
        let store = Arc::new(MockArtifactStore::new());
        store.insert("uploads/paper.pdf", fixtures::sample_pdf()).await;
        let engine = MockEngine::new();
        let worker = TranslationWorker::new(
            fixtures::worker_config(1),
            Arc::new(engine.clone()),
            ArtifactGateway::new(store.clone(), RetryPolicy::new(&fixtures::fast_retry())),
        );
        let job = Job::new("uploads/paper.pdf", JobConfig::default(), 2);
        (store, engine, worker, job)
    }

    #[tokio::test]
    async fn test_success_uploads_outputs() {
        let (store, engine, worker, job) = setup().await;
        engine.push(EngineStep::Produce(vec![
            "paper.mono.pdf".to_string(),
            "paper.dual.pdf".to_string(),
        ]));

        let outcome = worker.execute(&job, &not_cancelled()).await;
        assert_eq!(
            outcome,
            WorkerOutcome::succeeded(vec![
                "out/paper.mono.pdf".to_string(),
                "out/paper.dual.pdf".to_string()
            ])
        );
        assert!(store.object("out/paper.mono.pdf").await.is_some());

        let calls = engine.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input_bytes, fixtures::sample_pdf());
        assert!(calls[0].input.ends_with("paper.pdf"));
    }

    #[tokio::test]
    async fn test_staging_removed_after_attempt() {
        let (_store, engine, worker, job) = setup().await;

        worker.execute(&job, &not_cancelled()).await;
        let staged = &engine.recorded_calls()[0].input;
        assert!(!staged.exists());
        assert!(!staged.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let (_store, engine, worker, _) = setup().await;
        let job = Job::new("uploads/missing.pdf", JobConfig::default(), 2);

        let outcome = worker.execute(&job, &not_cancelled()).await;
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed {
                kind: ErrorKind::InvalidInput,
                class: ErrorClass::Fatal,
                ..
            }
        ));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_magic_is_fatal() {
        let (store, engine, worker, _) = setup().await;
        store.insert("uploads/notes.txt", b"hello".to_vec()).await;
        let job = Job::new("uploads/notes.txt", JobConfig::default(), 2);

        let outcome = worker.execute(&job, &not_cancelled()).await;
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed {
                kind: ErrorKind::InvalidInput,
                class: ErrorClass::Fatal,
                ..
            }
        ));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_store_retries_are_retryable() {
        let (store, _engine, worker, job) = setup().await;
        store
            .fail_next(3, ArtifactError::unavailable("connection reset"))
            .await;

        let outcome = worker.execute(&job, &not_cancelled()).await;
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed {
                kind: ErrorKind::TransientStoreError,
                class: ErrorClass::Retryable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_engine_failure_classification() {
        let (_store, engine, worker, job) = setup().await;
        engine.push(EngineStep::Fail("segfault".to_string()));
        engine.push(EngineStep::Reject("encrypted".to_string()));
        engine.push(EngineStep::ProduceNothing);

        let first = worker.execute(&job, &not_cancelled()).await;
        assert!(matches!(
            first,
            WorkerOutcome::Failed {
                kind: ErrorKind::EngineFailure,
                class: ErrorClass::Retryable,
                ..
            }
        ));

        let second = worker.execute(&job, &not_cancelled()).await;
        assert!(matches!(
            second,
            WorkerOutcome::Failed {
                kind: ErrorKind::InvalidInput,
                class: ErrorClass::Fatal,
                ..
            }
        ));

        let third = worker.execute(&job, &not_cancelled()).await;
        assert!(matches!(
            third,
            WorkerOutcome::Failed {
                kind: ErrorKind::EngineFailure,
                class: ErrorClass::Retryable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_checkpoint_skips_engine() {
        let (_store, engine, worker, job) = setup().await;

        let cancelled = Flag {
            cancelled: AtomicBool::new(true),
            ..Default::default()
        };
        let outcome = worker.execute(&job, &cancelled).await;
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed {
                kind: ErrorKind::Cancelled,
                ..
            }
        ));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_throttled() {
        let (_store, engine, worker, mut job) = setup().await;
        job.attempt = 1;
        engine.push(EngineStep::Progress(
            [100, 110, 125, 130, 500, 995, 1000]
                .into_iter()
                .map(|done| JobProgress::new(done, 1000))
                .collect(),
        ));

        let monitor = not_cancelled();
        let outcome = worker.execute(&job, &monitor).await;
        assert!(outcome.is_success());

        let reported = monitor.progress.lock().unwrap().clone();
        assert_eq!(
            reported,
            vec![(1, 10.0), (1, 12.5), (1, 50.0), (1, 99.5), (1, 100.0)]
        );
    }

    #[tokio::test]
    async fn test_permission_denied_upload_is_fatal() {
        let (store, _engine, worker, job) = setup().await;

        let worker = TranslationWorker::new(
            WorkerConfig {
                output_key_template: "readonly/{file_name}".to_string(),
                ..worker.config().clone()
            },
            Arc::new(MockEngine::new()),
            ArtifactGateway::new(
                Arc::new(ReadOnlyStore(store.clone())),
                RetryPolicy::no_retry(),
            ),
        );

        let outcome = worker.execute(&job, &not_cancelled()).await;
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed {
                kind: ErrorKind::StorageError,
                class: ErrorClass::Fatal,
                ..
            }
        ));
    }

    struct ReadOnlyStore(Arc<MockArtifactStore>);

    #[async_trait]
    impl ArtifactStore for ReadOnlyStore {
        fn name(&self) -> &str {
            "readonly"
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
            self.0.get(key).await
        }

        async fn put(&self, key: &str, _bytes: Vec<u8>) -> Result<String, ArtifactError> {
            Err(ArtifactError::PermissionDenied {
                key: key.to_string(),
            })
        }

        async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
            self.0.exists(key).await
        }
    }

    #[test]
    fn test_input_file_name() {
        assert_eq!(input_file_name("a/b/paper.pdf"), "paper.pdf");
        assert_eq!(input_file_name("paper.pdf"), "paper.pdf");
    }
}
