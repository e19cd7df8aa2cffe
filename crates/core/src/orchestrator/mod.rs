//! Job orchestrator: intake, result reconciliation, retry policy and the
//! reconciliation sweep.

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::JobOrchestrator;
pub use types::{
    OrchestratorError, OrchestratorStatus, ResultDisposition, SubmitRequest, Submission,
    SweepReport, WorkerOutcome,
};
