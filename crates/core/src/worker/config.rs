//! Configuration for the worker module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the worker pool and the translation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of pool slots, i.e. jobs executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Hard limit for one execution attempt in seconds.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,

    /// Parent directory for per-attempt staging directories.
    /// Defaults to the system temp directory.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Inputs larger than this are rejected as invalid.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Required leading bytes of an input document. Empty disables the check.
    #[serde(default = "default_input_magic")]
    pub input_magic: String,

    /// Object key for each output. Placeholders: `{job_id}`, `{attempt}`,
    /// `{file_name}`.
    #[serde(default = "default_output_key_template")]
    pub output_key_template: String,
}

fn default_concurrency() -> usize {
    2
}

fn default_execution_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_max_input_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_input_magic() -> String {
    "%PDF-".to_string()
}

fn default_output_key_template() -> String {
    "jobs/{job_id}/{attempt}/{file_name}".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            execution_timeout_secs: default_execution_timeout(),
            staging_dir: None,
            max_input_bytes: default_max_input_bytes(),
            input_magic: default_input_magic(),
            output_key_template: default_output_key_template(),
        }
    }
}

impl WorkerConfig {
    /// Sets the number of slots.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the execution timeout.
    pub fn with_execution_timeout(mut self, secs: u64) -> Self {
        self.execution_timeout_secs = secs;
        self
    }

    /// Object key for an output of `job_id` produced by `attempt`.
    pub fn output_key(&self, job_id: &str, attempt: u32, file_name: &str) -> String {
        self.output_key_template
            .replace("{job_id}", job_id)
            .replace("{attempt}", &attempt.to_string())
            .replace("{file_name}", file_name)
    }
}
