//! Observability endpoints: recent events, summary, failure trail

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::board::TaskStatus;

use super::AppState;

/// Query for `GET /leader`
#[derive(Debug, Deserialize)]
pub struct LeaderQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Recent orchestration events, oldest first
pub async fn leader(
    State(state): State<AppState>,
    Query(query): Query<LeaderQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(100).min(1000);
    let events = state.orchestrator.bus().recent(limit);
    Json(json!({ "events": events }))
}

pub async fn debug_summary(State(state): State<AppState>) -> Json<Value> {
    let board = state.orchestrator.board().summary();

    let mut job_counts: HashMap<String, usize> = HashMap::new();
    for job in state.orchestrator.queue().list() {
        *job_counts.entry(job.status.to_string()).or_insert(0) += 1;
    }

    let breakers: HashMap<String, Value> = state
        .orchestrator
        .breaker()
        .executors()
        .into_iter()
        .map(|executor| {
            let s = state.orchestrator.breaker().state(&executor);
            (executor, json!(s))
        })
        .collect();

    Json(json!({
        "tasks": board.counts,
        "wip": board.wip,
        "jobs": job_counts,
        "workers": state.orchestrator.queue().workers().list().len(),
        "packs": state.orchestrator.packs().len(),
        "breakers": breakers,
    }))
}

/// Every failed/blocked/dead-lettered task with its evidence trail
pub async fn debug_failures(State(state): State<AppState>) -> Json<Value> {
    let failures: Vec<Value> = state
        .orchestrator
        .board()
        .list()
        .into_iter()
        .filter(|t| {
            matches!(
                t.status,
                TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Dlq
            )
        })
        .map(|task| {
            let verdict = state.orchestrator.last_verdict(&task.id);
            let escalation = state.orchestrator.escalation().get(&task.id);
            json!({
                "task": task,
                "last_verdict": verdict,
                "escalation": escalation,
            })
        })
        .collect();

    Json(json!({ "failures": failures }))
}
