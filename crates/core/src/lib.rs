pub mod artifact;
pub mod config;
pub mod engine;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod testing;
pub mod worker;

pub use artifact::{
    validate_key, ArtifactError, ArtifactGateway, ArtifactStore, FsArtifactStore,
    HttpArtifactStore, StorageBackend,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use engine::{CommandEngine, EngineError, TranslationEngine};
pub use job::{
    ErrorClass, ErrorKind, Job, JobConfig, JobError, JobFilter, JobProgress, JobStatus, JobStore,
    JobStoreError, MetadataBackend, PostgrestJobStore, RetryingJobStore, SqliteJobStore,
    TranslationMode,
};
pub use orchestrator::{
    JobOrchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus,
    ResultDisposition, SubmitRequest, Submission, SweepReport, WorkerOutcome,
};
pub use queue::{SqliteWorkQueue, WorkQueue};
pub use retry::{RetryConfig, RetryPolicy};
pub use worker::{PoolStatus, TranslationWorker, WorkerConfig, WorkerPool};
