//! HTTP control surface
//!
//! JSON over axum. Producers create jobs, workers register/claim/complete,
//! operators inspect the board and the failure trail. Long-poll claim is
//! the one intentionally slow endpoint (bounded by `wait_ms`).

pub mod board_api;
pub mod debug;
pub mod jobs;
pub mod workers;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::board::BoardError;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::pack::PackError;
use crate::queue::QueueError;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the full route table
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/atomic", post(jobs::create_job_atomic))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{id}/requeue", post(jobs::requeue_job))
        .route("/jobs/{id}/complete", post(jobs::complete_job))
        .route("/packs/{id}", get(jobs::get_pack))
        .route("/workers/register", post(workers::register_worker))
        .route("/workers/{id}/claim", get(workers::claim_job))
        .route("/board", get(board_api::get_board))
        .route("/board/tasks/{id}/split", post(board_api::split_task))
        .route("/board/tasks/{id}/dispatch", post(board_api::dispatch_task))
        .route("/board/tasks/{id}/unblock", post(board_api::unblock_task))
        .route("/leader", get(debug::leader))
        .route("/debug/summary", get(debug::debug_summary))
        .route("/debug/failures", get(debug::debug_failures))
        .with_state(AppState { orchestrator })
}

/// API error with an HTTP status and a machine-readable body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        let status = match &e {
            OrchestratorError::Board(b) => board_status(b),
            OrchestratorError::Queue(q) => queue_status(q),
            OrchestratorError::Pack(p) => pack_status(p),
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::ExecutorNotAllowed { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self {
            status: queue_status(&e),
            message: e.to_string(),
        }
    }
}

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        Self {
            status: board_status(&e),
            message: e.to_string(),
        }
    }
}

impl From<PackError> for ApiError {
    fn from(e: PackError) -> Self {
        Self {
            status: pack_status(&e),
            message: e.to_string(),
        }
    }
}

fn board_status(e: &BoardError) -> StatusCode {
    match e {
        BoardError::NotFound(_) => StatusCode::NOT_FOUND,
        BoardError::InvalidTransition { .. } | BoardError::AttemptsExhausted { .. } => {
            StatusCode::CONFLICT
        }
        BoardError::InvalidPins { .. }
        | BoardError::UnknownRole(_)
        | BoardError::ParentNotDispatchable(_) => StatusCode::BAD_REQUEST,
    }
}

fn queue_status(e: &QueueError) -> StatusCode {
    match e {
        QueueError::NotFound(_) | QueueError::WorkerUnknown(_) => StatusCode::NOT_FOUND,
        QueueError::DuplicateDispatch { .. } | QueueError::InvalidStatus { .. } => {
            StatusCode::CONFLICT
        }
        QueueError::PolicyViolation { .. } => StatusCode::FORBIDDEN,
    }
}

fn pack_status(e: &PackError) -> StatusCode {
    match e {
        PackError::NotFound(_) => StatusCode::NOT_FOUND,
        PackError::EmptyPack | PackError::PathEscapesRoot(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
