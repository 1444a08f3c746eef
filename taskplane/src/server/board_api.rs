//! Board endpoints: summary, split, dispatch, unblock

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::board::task::TaskSpec;
use crate::queue::RunnerKind;

use super::{ApiError, AppState};

pub async fn get_board(State(state): State<AppState>) -> Json<Value> {
    let summary = state.orchestrator.board().summary();
    Json(json!({ "board": summary }))
}

/// Body for `POST /board/tasks/{id}/split`
#[derive(Debug, Deserialize)]
pub struct SplitRequest {
    pub children: Vec<TaskSpec>,
}

pub async fn split_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SplitRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.children.is_empty() {
        return Err(ApiError::bad_request("children must not be empty"));
    }
    let children = state.orchestrator.board().split(&id, request.children)?;
    Ok((StatusCode::CREATED, Json(json!({ "children": children }))))
}

/// Body for `POST /board/tasks/{id}/dispatch`
#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub runner: Option<RunnerKind>,
}

pub async fn dispatch_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.orchestrator.dispatch(
        &id,
        request.executor.as_deref(),
        request.model.as_deref(),
        request.runner.unwrap_or(RunnerKind::External),
    )?;
    Ok(Json(json!({ "dispatch": outcome })))
}

pub async fn unblock_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = state.orchestrator.unblock(&id)?;
    Ok(Json(json!({ "task_id": id, "task_status": status })))
}
