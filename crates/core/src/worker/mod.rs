//! Worker pool and the translation worker it runs.

mod config;
mod pool;
mod translate;

pub use config::WorkerConfig;
pub use pool::{PoolStatus, SlotState, WorkerPool};
pub use translate::{AttemptMonitor, TranslationWorker};
