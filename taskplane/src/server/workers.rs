//! Worker endpoints: register and long-poll claim

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, AppState};

/// Upper bound on a single long-poll wait
const MAX_WAIT_MS: u64 = 60_000;

/// Body for `POST /workers/register`
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub executors: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

pub async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if request.executors.is_empty() {
        return Err(ApiError::bad_request("executors must not be empty"));
    }
    let worker = state
        .orchestrator
        .queue()
        .register_worker(request.name, request.executors, request.models);
    Ok((StatusCode::CREATED, Json(json!({ "worker": worker }))))
}

/// Query for `GET /workers/{id}/claim`
#[derive(Debug, Deserialize)]
pub struct ClaimQuery {
    pub executor: String,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Long-poll claim: `200` with the job, or `204` when nothing matched
/// within the wait. Client disconnect drops the future and releases the
/// waiter.
pub async fn claim_job(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Query(query): Query<ClaimQuery>,
) -> Result<Response, ApiError> {
    let default_wait = state.orchestrator.queue().config().default_wait;
    let wait = query
        .wait_ms
        .map(|ms| Duration::from_millis(ms.min(MAX_WAIT_MS)))
        .unwrap_or(default_wait);

    let claimed = state
        .orchestrator
        .queue()
        .claim(&worker_id, &query.executor, wait)
        .await?;

    match claimed {
        Some(job) => {
            // Hand the worker its full contract: pack reference, model,
            // task type, and how long the lease runs.
            let task = state.orchestrator.board().get(&job.task_id)?;
            let lease_ms = state.orchestrator.queue().config().lease.as_millis() as u64;
            Ok((
                StatusCode::OK,
                Json(json!({
                    "job": job,
                    "goal": task.goal,
                    "role": task.role,
                    "task_type": task.task_type,
                    "pins": task.pins,
                    "context_pack_ref": format!("/packs/{}", job.context_pack_id),
                    "timeout_ms": lease_ms,
                })),
            )
                .into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
