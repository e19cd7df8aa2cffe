//! Work queue configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the SQLite work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a dequeued message stays invisible without an ack (seconds).
    /// Must exceed the worker execution timeout.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// How often a blocked dequeue re-checks for ready messages (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_visibility_timeout() -> u64 {
    2100 // 35 minutes
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.visibility_timeout_secs, 2100);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: QueueConfig = toml::from_str("visibility_timeout_secs = 60").unwrap();
        assert_eq!(config.visibility_timeout_secs, 60);
        assert_eq!(config.poll_interval_ms, 500);
    }
}
