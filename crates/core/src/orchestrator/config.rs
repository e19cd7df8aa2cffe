//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries allowed after the first execution.
    /// A job runs at most `max_attempts + 1` times.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry (seconds). Doubles per attempt.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    /// Upper bound on the backoff (seconds).
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    /// How long a RUNNING job may go without a result before the sweep
    /// treats its worker as lost (seconds).
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,

    /// How often the reconciliation sweep runs (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// How long a QUEUED or due RETRYING job may sit before the sweep
    /// repairs its queue message (seconds).
    #[serde(default = "default_requeue_grace")]
    pub requeue_grace_secs: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_base_delay() -> u64 {
    30
}

fn default_retry_max_delay() -> u64 {
    600 // 10 minutes
}

fn default_lease_timeout() -> u64 {
    2400 // 40 minutes
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_requeue_grace() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            lease_timeout_secs: default_lease_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            requeue_grace_secs: default_requeue_grace(),
        }
    }
}

impl OrchestratorConfig {
    /// Backoff after attempt number `attempt` failed: `min(base * 2^attempt, cap)`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let secs = self
            .retry_base_delay_secs
            .saturating_mul(factor)
            .min(self.retry_max_delay_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.retry_base_delay_secs, 30);
        assert_eq!(config.retry_max_delay_secs, 600);
        assert_eq!(config.lease_timeout_secs, 2400);
        assert_eq!(config.sweep_interval_secs, 60);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: OrchestratorConfig = toml::from_str("max_attempts = 5").unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_base_delay_secs, 30);
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = OrchestratorConfig {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 200,
            ..Default::default()
        };
        assert_eq!(config.retry_delay(0), Duration::from_secs(30));
        assert_eq!(config.retry_delay(1), Duration::from_secs(60));
        assert_eq!(config.retry_delay(2), Duration::from_secs(120));
        assert_eq!(config.retry_delay(3), Duration::from_secs(200));
        assert_eq!(config.retry_delay(40), Duration::from_secs(200));
    }
}
