use super::{types::Config, ConfigError};
use crate::artifact::StorageBackend;
use crate::job::MetadataBackend;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Worker pool has at least one slot
/// - Queue visibility and orchestrator lease outlive one execution attempt
/// - Retry backoff base does not exceed its cap
/// - Adapter retry allows at least one try
/// - The selected metadata and storage backends have their sections
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: String| Err(ConfigError::ValidationError(msg));

    // Server validation
    if config.server.port == 0 {
        return fail("server.port cannot be 0".to_string());
    }

    if config.worker.concurrency == 0 {
        return fail("worker.concurrency must be at least 1".to_string());
    }
    if config.worker.execution_timeout_secs == 0 {
        return fail("worker.execution_timeout_secs cannot be 0".to_string());
    }

    let execution = config.worker.execution_timeout_secs;
    if config.queue.visibility_timeout_secs <= execution {
        return fail(format!(
            "queue.visibility_timeout_secs ({}) must exceed worker.execution_timeout_secs ({})",
            config.queue.visibility_timeout_secs, execution
        ));
    }
    if config.orchestrator.lease_timeout_secs <= execution {
        return fail(format!(
            "orchestrator.lease_timeout_secs ({}) must exceed worker.execution_timeout_secs ({})",
            config.orchestrator.lease_timeout_secs, execution
        ));
    }

    if config.orchestrator.retry_base_delay_secs > config.orchestrator.retry_max_delay_secs {
        return fail(
            "orchestrator.retry_base_delay_secs cannot exceed retry_max_delay_secs".to_string(),
        );
    }

    if config.adapter_retry.max_attempts == 0 {
        return fail("adapter_retry.max_attempts must be at least 1".to_string());
    }

    if config.metadata.backend == MetadataBackend::Postgrest
        && config.metadata.postgrest.is_none()
    {
        return fail("metadata.backend = \"postgrest\" requires [metadata.postgrest]".to_string());
    }

    if config.storage.backend == StorageBackend::Http && config.storage.http.is_none() {
        return fail("storage.backend = \"http\" requires [storage.http]".to_string());
    }

    if config.engine.command.as_os_str().is_empty() {
        return fail("engine.command cannot be empty".to_string());
    }

    Ok(())
}
