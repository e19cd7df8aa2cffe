//! Job records, their state machine, and the stores that persist them.

mod config;
mod postgrest_store;
mod sqlite_store;
mod store;
mod transition;
mod types;

pub use config::{MetadataBackend, MetadataConfig, PostgrestConfig};
pub use postgrest_store::PostgrestJobStore;
pub use sqlite_store::SqliteJobStore;
pub use store::{JobFilter, JobStore, JobStoreError, RetryingJobStore};
pub use transition::TransitionError;
pub use types::{
    ErrorClass, ErrorKind, Job, JobConfig, JobError, JobProgress, JobStatus, TranslationMode,
    MAX_ERROR_MESSAGE_LEN,
};
