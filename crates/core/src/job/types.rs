//! Core job data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Longest `last_error` message kept on a job record.
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

static LANGUAGE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})*$").unwrap());

// ============================================================================
// Status
// ============================================================================

/// Lifecycle state of a job.
///
/// ```text
/// QUEUED -> RUNNING -> SUCCEEDED
///                   -> RETRYING -> QUEUED
///                   -> FAILED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Retrying,
    ];

    /// Returns true if no transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Retrying)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Retrying, JobStatus::Queued)
        )
    }

    /// Returns the status as stored and filtered on.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Retrying => "RETRYING",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            "RETRYING" => Ok(JobStatus::Retrying),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

// ============================================================================
// Configuration passed through to the engine
// ============================================================================

/// Which documents the engine should render.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    /// Translated text only.
    Mono,
    /// Original and translation side by side.
    Dual,
    /// Both of the above.
    #[default]
    Both,
}

impl TranslationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationMode::Mono => "mono",
            TranslationMode::Dual => "dual",
            TranslationMode::Both => "both",
        }
    }
}

/// Translation parameters. The orchestrator only validates the shape and
/// hands the value to the worker unmodified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    #[serde(default)]
    pub mode: TranslationMode,
    /// Engine specific options.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub engine_options: serde_json::Map<String, serde_json::Value>,
}

fn default_source_lang() -> String {
    "en".to_string()
}

fn default_target_lang() -> String {
    "zh-CN".to_string()
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            mode: TranslationMode::default(),
            engine_options: serde_json::Map::new(),
        }
    }
}

impl JobConfig {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: TranslationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.engine_options.insert(key.into(), value);
        self
    }

    /// Check that the configuration is well-formed.
    pub fn validate(&self) -> Result<(), String> {
        if !LANGUAGE_CODE.is_match(&self.source_lang) {
            return Err(format!("invalid source language: {:?}", self.source_lang));
        }
        if !LANGUAGE_CODE.is_match(&self.target_lang) {
            return Err(format!("invalid target language: {:?}", self.target_lang));
        }
        if self.source_lang == self.target_lang {
            return Err("source and target language are the same".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Errors recorded on jobs
// ============================================================================

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed submission or unusable input document.
    InvalidInput,
    /// Object or metadata store still failing after adapter retries.
    TransientStoreError,
    /// Permanent storage failure (permission denied, malformed key).
    StorageError,
    /// The engine failed or produced nothing usable.
    EngineFailure,
    /// The attempt exceeded its wall-clock bound.
    WorkerTimeout,
    /// The worker holding the job stopped reporting.
    WorkerLost,
    /// Retryable failure with no attempts left.
    AttemptsExhausted,
    /// Cancelled by request.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::TransientStoreError => "transient_store_error",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::EngineFailure => "engine_failure",
            ErrorKind::WorkerTimeout => "worker_timeout",
            ErrorKind::WorkerLost => "worker_lost",
            ErrorKind::AttemptsExhausted => "attempts_exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Human readable error summary stored on the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    /// Build a summary, keeping only the first line of `detail` and capping
    /// its length so internal error chains never reach clients.
    pub fn new(kind: ErrorKind, detail: impl AsRef<str>) -> Self {
        let first_line = detail.as_ref().lines().next().unwrap_or("").trim();
        let message = if first_line.chars().count() > MAX_ERROR_MESSAGE_LEN {
            let mut truncated: String = first_line.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
            truncated.push_str("...");
            truncated
        } else {
            first_line.to_string()
        };
        Self { kind, message }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Engine progress within the running attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    /// Rounded to one decimal.
    pub percent: f64,
    pub current: u64,
    pub total: u64,
}

impl JobProgress {
    /// `current` is clamped to `total`; a zero total reads as 0%.
    pub fn new(current: u64, total: u64) -> Self {
        let current = current.min(total);
        let percent = if total == 0 {
            0.0
        } else {
            (current as f64 * 1000.0 / total as f64).round() / 10.0
        };
        Self {
            percent,
            current,
            total,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current == self.total
    }
}

// ============================================================================
// Job
// ============================================================================

/// A translation job and its tracked lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub input_ref: String,
    /// Produced artifacts, non-empty iff the job succeeded.
    #[serde(default)]
    pub output_refs: Vec<String>,
    pub config: JobConfig,
    /// Zero-based index of the current execution.
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub last_error: Option<JobError>,
    /// Higher is delivered first.
    #[serde(default)]
    pub priority: u16,
    /// Caller supplied reference used for de-duplication.
    #[serde(default)]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Last reported engine progress of the current or most recent attempt.
    #[serde(default)]
    pub progress: Option<JobProgress>,
    /// When a RETRYING job becomes eligible to run again.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    /// When a RUNNING job is presumed lost.
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Compare-and-set token, bumped on every write.
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh QUEUED job with attempt 0.
    pub fn new(input_ref: impl Into<String>, config: JobConfig, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            input_ref: input_ref.into(),
            output_refs: Vec::new(),
            config,
            attempt: 0,
            max_attempts,
            last_error: None,
            priority: 0,
            client_ref: None,
            cancel_requested: false,
            progress: None,
            retry_at: None,
            lease_expires_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_client_ref(mut self, client_ref: Option<String>) -> Self {
        self.client_ref = client_ref;
        self
    }

    /// True when another retry is allowed after the current attempt.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}
