use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use doctrans_core::{OrchestratorStatus, PoolStatus, SanitizedConfig};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Job store reachable, so submissions can be accepted.
    pub intake: String,
    /// At least one worker slot can take work.
    pub workers: String,
}

/// `200 ok` when both checks pass, `503 degraded` otherwise.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let intake = match state.orchestrator().store().ping().await {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            warn!("Health check could not reach the job store: {}", e);
            "unavailable".to_string()
        }
    };

    let workers = match state.pool() {
        Some(pool) if pool.status().await.is_responsive() => "ok".to_string(),
        Some(_) => "stopped".to_string(),
        None => "disabled".to_string(),
    };

    let healthy = intake == "ok" && workers != "stopped";
    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            checks: HealthChecks { intake, workers },
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub orchestrator: OrchestratorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatus>,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let orchestrator = state.orchestrator().status().await;
    let pool = match state.pool() {
        Some(pool) => Some(pool.status().await),
        None => None,
    };
    Json(StatusResponse { orchestrator, pool })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}
