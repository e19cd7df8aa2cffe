//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the doctrans server:
//! - HTTP request metrics (latency, counts)
//! - Jobs by status and queue depth (collected dynamically)
//! - Worker pool slot usage (collected dynamically)
//!
//! Core counters (submissions, attempts, retries, sweep repairs) live in
//! `doctrans_core::metrics` and are registered here as well.

use axum::{extract::State, http::header, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use std::sync::Arc;

use doctrans_core::JobStatus;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "doctrans_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("doctrans_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "doctrans_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Job Metrics (collected dynamically)
// =============================================================================

/// Jobs by current status.
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("doctrans_jobs_by_status", "Current job count by status"),
        &["status"],
    )
    .unwrap()
});

/// Queue messages waiting for delivery.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "doctrans_queue_depth",
        "Queue messages ready or delayed, excluding leased ones",
    )
    .unwrap()
});

/// Sweep running state (1 = running, 0 = stopped).
pub static SWEEP_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "doctrans_sweep_running",
        "Whether the reconciliation sweep is running (1) or stopped (0)",
    )
    .unwrap()
});

// =============================================================================
// Worker Pool Metrics (collected dynamically)
// =============================================================================

/// Slots currently executing a job.
pub static POOL_BUSY_SLOTS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "doctrans_pool_busy_slots",
        "Number of worker slots executing a job",
    )
    .unwrap()
});

/// Configured slot count.
pub static POOL_CONCURRENCY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("doctrans_pool_concurrency", "Configured number of worker slots").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Jobs
    registry.register(Box::new(JOBS_BY_STATUS.clone())).unwrap();
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();
    registry.register(Box::new(SWEEP_RUNNING.clone())).unwrap();

    // Pool
    registry.register(Box::new(POOL_BUSY_SLOTS.clone())).unwrap();
    registry
        .register(Box::new(POOL_CONCURRENCY.clone()))
        .unwrap();

    // Core metrics (orchestrator, worker pool, adapters)
    for metric in doctrans_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the store, queue and pool
/// at scrape time.
pub async fn collect_dynamic_metrics(state: &AppState) {
    let status = state.orchestrator().status().await;
    SWEEP_RUNNING.set(if status.running { 1 } else { 0 });
    QUEUE_DEPTH.set(status.queue_depth as i64);
    for (job_status, count) in [
        (JobStatus::Queued, status.queued),
        (JobStatus::Running, status.running_jobs),
        (JobStatus::Retrying, status.retrying),
        (JobStatus::Succeeded, status.succeeded),
        (JobStatus::Failed, status.failed),
    ] {
        JOBS_BY_STATUS
            .with_label_values(&[job_status.as_str()])
            .set(count);
    }

    if let Some(pool) = state.pool() {
        let pool_status = pool.status().await;
        POOL_BUSY_SLOTS.set(pool_status.busy_slots as i64);
        POOL_CONCURRENCY.set(pool_status.concurrency as i64);
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        encode_metrics(),
    )
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_RE.replace_all(path, "{id}");
    let result = NUMERIC_RE.replace_all(&result, "/{id}$1");
    result.to_string()
}
