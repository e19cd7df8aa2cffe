//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use doctrans_core::{
    Job, JobConfig, JobError, JobFilter, JobProgress, JobStatus, SubmitRequest,
};

use super::error::ApiError;
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    /// Object store key of the source document
    pub input_ref: String,
    #[serde(default)]
    pub config: Option<JobConfig>,
    /// Caller reference for de-duplicating resubmissions
    #[serde(default)]
    pub client_ref: Option<String>,
    /// Higher is delivered first
    #[serde(default)]
    pub priority: Option<u16>,
}

/// Response for a submission
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub deduplicated: bool,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub client_ref: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Snapshot of a job
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub status: JobStatus,
    pub input_ref: String,
    pub output_refs: Vec<String>,
    pub config: JobConfig,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
    pub priority: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    pub cancel_requested: bool,
    /// Last engine progress of the current or final attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            input_ref: job.input_ref,
            output_refs: job.output_refs,
            config: job.config,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
            priority: job.priority,
            client_ref: job.client_ref,
            cancel_requested: job.cancel_requested,
            progress: job.progress,
            retry_at: job.retry_at.map(|t| t.to_rfc3339()),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Produced artifacts of a succeeded job
#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub job_id: String,
    pub output_refs: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a translation job
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitJobBody>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let request = SubmitRequest {
        input_ref: body.input_ref,
        config: body.config.unwrap_or_default(),
        client_ref: body.client_ref,
        priority: body.priority.unwrap_or(0),
    };

    let submission = state.orchestrator().submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: submission.job.id,
            status: submission.job.status,
            deduplicated: submission.deduplicated,
        }),
    ))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.orchestrator().get_status(&id).await?;
    Ok(Json(JobResponse::from(job)))
}

/// Get the outputs of a succeeded job
pub async fn get_job_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResultResponse>, ApiError> {
    let output_refs = state.orchestrator().fetch_result(&id).await?;
    Ok(Json(JobResultResponse {
        job_id: id,
        output_refs,
    }))
}

/// List jobs with optional filters
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref status) = params.status {
        let status = status.parse::<JobStatus>().map_err(ApiError::bad_request)?;
        filter = filter.with_status(status);
    }

    if let Some(ref client_ref) = params.client_ref {
        filter = filter.with_client_ref(client_ref);
    }

    let jobs = state.orchestrator().list_jobs(&filter).await?;

    // Total ignores pagination
    let count_filter = JobFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter.clone()
    };
    let total = state.orchestrator().count_jobs(&count_filter).await?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Request cancellation of a job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job = state.orchestrator().cancel(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobResponse::from(job))))
}
