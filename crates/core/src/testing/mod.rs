//! Testing utilities and mock implementations.
//!
//! Mocks for the two external capabilities, the object store and the
//! translation engine, so the whole job lifecycle can be exercised
//! in-process against in-memory SQLite.
//!
//! # Example
//!
//! ```rust,ignore
//! use doctrans_core::testing::{fixtures, EngineStep, MockArtifactStore, MockEngine};
//!
//! let store = MockArtifactStore::new();
//! store.insert("in/1.pdf", fixtures::sample_pdf()).await;
//!
//! let engine = MockEngine::new();
//! engine.push(EngineStep::Fail("crashed".into()));
//! ```

mod mock_artifact_store;
mod mock_engine;

pub use mock_artifact_store::MockArtifactStore;
pub use mock_engine::{EngineStep, MockEngine, RecordedTranslation};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::orchestrator::OrchestratorConfig;
    use crate::queue::QueueConfig;
    use crate::retry::RetryConfig;
    use crate::worker::WorkerConfig;

    /// A minimal document that passes the worker's magic-byte check.
    pub fn sample_pdf() -> Vec<u8> {
        b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n"
            .to_vec()
    }

    /// Orchestrator config with no backoff, so retries are immediately due.
    pub fn orchestrator_config(max_attempts: u32) -> OrchestratorConfig {
        OrchestratorConfig {
            max_attempts,
            retry_base_delay_secs: 0,
            retry_max_delay_secs: 0,
            lease_timeout_secs: 60,
            sweep_interval_secs: 1,
            requeue_grace_secs: 0,
        }
    }

    /// Queue config with short polling for tests.
    pub fn queue_config() -> QueueConfig {
        QueueConfig {
            visibility_timeout_secs: 60,
            poll_interval_ms: 20,
        }
    }

    /// Adapter retry policy with millisecond delays.
    pub fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    /// Worker config writing outputs under `out/`.
    pub fn worker_config(concurrency: usize) -> WorkerConfig {
        WorkerConfig {
            concurrency,
            execution_timeout_secs: 30,
            output_key_template: "out/{file_name}".to_string(),
            ..Default::default()
        }
    }
}
