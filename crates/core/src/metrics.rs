//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (submissions, retries, terminal results, sweep reclaims)
//! - Worker pool (attempts and their durations)
//! - Storage adapters (retries of transient failures)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator
// =============================================================================

/// Submissions by result.
pub static JOBS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("doctrans_jobs_submitted_total", "Total job submissions"),
        &["result"], // "created", "deduplicated", "rejected"
    )
    .unwrap()
});

/// Jobs reaching a terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doctrans_jobs_finished_total",
            "Jobs that reached a terminal state",
        ),
        &["status", "kind"],
    )
    .unwrap()
});

/// Retries scheduled after a retryable failure.
pub static RETRIES_SCHEDULED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doctrans_retries_scheduled_total",
            "Retries scheduled after a retryable failure",
        ),
        &["kind"],
    )
    .unwrap()
});

/// Worker results that were ignored.
pub static RESULTS_DISCARDED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doctrans_results_discarded_total",
            "Worker results ignored as duplicate or stale",
        ),
        &["reason"], // "duplicate", "stale"
    )
    .unwrap()
});

/// Repairs made by the reconciliation sweep.
pub static SWEEP_REPAIRS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doctrans_sweep_repairs_total",
            "Jobs repaired by the reconciliation sweep",
        ),
        &["action"], // "lease_expired", "requeued", "reenqueued"
    )
    .unwrap()
});

// =============================================================================
// Worker pool
// =============================================================================

/// Execution attempts by outcome.
pub static ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("doctrans_attempts_total", "Execution attempts by outcome"),
        &["outcome"], // "succeeded", or an error kind
    )
    .unwrap()
});

/// Attempt duration in seconds.
pub static ATTEMPT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "doctrans_attempt_duration_seconds",
            "Wall-clock duration of one execution attempt",
        )
        .buckets(vec![
            1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0,
        ]),
        &["outcome"],
    )
    .unwrap()
});

/// Deliveries skipped because the job was not runnable.
pub static DELIVERIES_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "doctrans_deliveries_skipped_total",
        "Queue deliveries acknowledged without running the job",
    )
    .unwrap()
});

// =============================================================================
// Adapters
// =============================================================================

/// Adapter retries by operation.
pub static ADAPTER_RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "doctrans_adapter_retries_total",
            "Retries of transient storage failures",
        ),
        &["operation"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        Box::new(RESULTS_DISCARDED.clone()),
        Box::new(SWEEP_REPAIRS.clone()),
        Box::new(ATTEMPTS_TOTAL.clone()),
        Box::new(ATTEMPT_DURATION.clone()),
        Box::new(DELIVERIES_SKIPPED.clone()),
        Box::new(ADAPTER_RETRIES_TOTAL.clone()),
    ]
}
