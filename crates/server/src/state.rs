use std::sync::Arc;

use doctrans_core::{Config, JobOrchestrator, SanitizedConfig, WorkerPool};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<JobOrchestrator>,
    pool: Option<Arc<WorkerPool>>,
}

impl AppState {
    /// `pool` is `None` for an intake-only node that runs no workers.
    pub fn new(
        config: Config,
        orchestrator: Arc<JobOrchestrator>,
        pool: Option<Arc<WorkerPool>>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            pool,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }
}
