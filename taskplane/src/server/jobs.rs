//! Job endpoints: create, inspect, cancel, requeue, complete

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::board::task::{Pins, TaskKind, TaskSpec, TaskType};
use crate::queue::RunnerKind;

use super::{ApiError, AppState};

/// Minimum characters for a goal to be dispatchable at all
const MIN_GOAL_LEN: usize = 8;

/// Body for `POST /jobs` and `POST /jobs/atomic`
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub lane: Option<String>,
    /// Files the job is scoped to; becomes the allow pins when no explicit
    /// pins are given
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub pins: Option<Pins>,
    #[serde(default)]
    pub allowed_executors: Vec<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub runner: Option<RunnerKind>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Explicit override for executors that do not need a file scope
    #[serde(default)]
    pub allow_empty_files: bool,
}

impl CreateJobRequest {
    /// Validate the request and lower it to a task spec
    fn into_spec(self, force_atomic: bool) -> Result<(TaskSpec, JobParams), ApiError> {
        let goal = self
            .goal
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| ApiError::bad_request("goal is required"))?;
        if goal.len() < MIN_GOAL_LEN {
            return Err(ApiError::bad_request(format!(
                "goal too short (< {} chars)",
                MIN_GOAL_LEN
            )));
        }

        let kind = if force_atomic {
            TaskKind::Atomic
        } else {
            self.kind.unwrap_or(TaskKind::Atomic)
        };

        let pins = match self.pins {
            Some(pins) => pins,
            None => Pins::new(self.files.clone(), vec![]),
        };
        if kind == TaskKind::Atomic && pins.allowed_paths.is_empty() && !self.allow_empty_files {
            return Err(ApiError::bad_request(
                "files (or pins.allowed_paths) required; pass allow_empty_files to override",
            ));
        }

        let params = JobParams {
            executor: self.executor,
            model: self.model,
            runner: self.runner.unwrap_or(RunnerKind::External),
        };
        let spec = TaskSpec {
            title: self
                .title
                .unwrap_or_else(|| goal.chars().take(64).collect()),
            goal: goal.to_string(),
            role: self.role.unwrap_or_else(|| "coder".to_string()),
            kind: Some(kind),
            task_type: self.task_type.unwrap_or_default(),
            lane: self.lane,
            pins,
            allowed_executors: self.allowed_executors,
            allowed_models: self.allowed_models,
            files: self.files,
            max_attempts: self.max_attempts,
        };
        Ok((spec, params))
    }
}

#[derive(Debug)]
struct JobParams {
    executor: Option<String>,
    model: Option<String>,
    runner: RunnerKind,
}

async fn create_with(
    state: AppState,
    request: CreateJobRequest,
    force_atomic: bool,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (spec, params) = request.into_spec(force_atomic)?;
    let (status, task_id, outcome) = state.orchestrator.create_and_dispatch(
        spec,
        params.executor.as_deref(),
        params.model.as_deref(),
        params.runner,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "task_id": task_id,
            "task_status": status,
            "dispatch": outcome,
        })),
    ))
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    create_with(state, request, false).await
}

pub async fn create_job_atomic(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    create_with(state, request, true).await
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let mut jobs = state.orchestrator.queue().list();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(json!({ "jobs": jobs }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state.orchestrator.queue().get(&id)?;
    Ok(Json(json!({ "job": job })))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, ApiError> {
    let reason = request.reason.unwrap_or_else(|| "canceled_by_operator".to_string());
    let job = state.orchestrator.queue().cancel(&id, &reason)?;
    Ok(Json(json!({ "job": job })))
}

pub async fn requeue_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state.orchestrator.queue().requeue(&id)?;
    Ok(Json(json!({ "job": job })))
}

/// Body for `POST /jobs/{id}/complete`
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub worker_id: String,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    /// The structured submission; falls back to parsing stdout as JSON
    #[serde(default)]
    pub submission: Option<Value>,
    /// Nonce-bound hashes proving the worker read the served pack bytes
    #[serde(default)]
    pub attested_hashes: Option<BTreeMap<String, String>>,
}

pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Value>, ApiError> {
    // The worker's reasoning is opaque; only the structured submission is
    // interpreted.
    let submission = request.submission.or_else(|| {
        request
            .stdout
            .as_deref()
            .and_then(|s| serde_json::from_str::<Value>(s.trim()).ok())
    });

    let outcome = state.orchestrator.settle(
        &id,
        &request.worker_id,
        request.exit_code,
        submission.as_ref(),
        request.attested_hashes.as_ref(),
    )?;
    Ok(Json(json!({ "result": outcome })))
}

pub async fn get_pack(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let pack = state.orchestrator.packs().get(&id)?;
    Ok(Json(json!({ "pack": pack })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> CreateJobRequest {
        CreateJobRequest {
            title: None,
            goal: Some("implement the widget end to end".to_string()),
            role: None,
            kind: None,
            task_type: None,
            lane: None,
            files: vec!["src/widget.rs".to_string()],
            pins: None,
            allowed_executors: vec![],
            allowed_models: vec![],
            executor: None,
            model: None,
            runner: None,
            max_attempts: None,
            allow_empty_files: false,
        }
    }

    #[test]
    fn test_missing_goal_is_rejected() {
        let request = CreateJobRequest {
            goal: None,
            ..base_request()
        };
        let err = request.into_spec(true).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_short_goal_is_rejected() {
        let request = CreateJobRequest {
            goal: Some("fix".to_string()),
            ..base_request()
        };
        let err = request.into_spec(true).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("too short"));
    }

    #[test]
    fn test_empty_files_requires_override() {
        let request = CreateJobRequest {
            files: vec![],
            ..base_request()
        };
        let err = request.into_spec(true).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let request = CreateJobRequest {
            files: vec![],
            allow_empty_files: true,
            ..base_request()
        };
        assert!(request.into_spec(true).is_ok());
    }

    #[test]
    fn test_files_become_allow_pins() {
        let request = base_request();
        let (spec, _) = request.into_spec(true).unwrap();
        assert_eq!(spec.pins.allowed_paths, vec!["src/widget.rs".to_string()]);
        assert_eq!(spec.kind, Some(TaskKind::Atomic));
    }

    #[test]
    fn test_atomic_endpoint_forces_atomic() {
        let request = CreateJobRequest {
            kind: Some(TaskKind::Parent),
            ..base_request()
        };
        let (spec, _) = request.into_spec(true).unwrap();
        assert_eq!(spec.kind, Some(TaskKind::Atomic));
    }
}
