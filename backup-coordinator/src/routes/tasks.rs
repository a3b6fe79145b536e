//! Agent transport: asynchronous progress and completion reports.
//!
//! Reports are accepted only from the agent currently recorded on the
//! unit. After an eviction/reassignment the old holder's reports are
//! stale and rejected; timeout eviction takes precedence over a late
//! failure report.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use backup_agent::task::{CompletionReport, ProgressUpdate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub agent_id: String,
    #[serde(flatten)]
    pub update: ProgressUpdate,
}

fn ensure_holder(state: &AppState, unit_id: &str, agent_id: &str) -> Result<(), AppError> {
    if state.store.get(unit_id).is_none() {
        return Err(AppError::NotFound(format!("unknown unit: {unit_id}")));
    }
    if !state.reporter.agent_holds(unit_id, agent_id) {
        return Err(AppError::Conflict(format!(
            "unit {unit_id} is not held by agent {agent_id}"
        )));
    }
    Ok(())
}

pub async fn progress(
    State(state): State<Arc<AppState>>,
    Path(unit_id): Path<String>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_holder(&state, &unit_id, &req.agent_id)?;
    state.reporter.apply_progress(&unit_id, &req.update);
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub agent_id: String,
    #[serde(flatten)]
    pub report: CompletionReport,
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(unit_id): Path<String>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_holder(&state, &unit_id, &req.agent_id)?;
    state.reporter.apply_completion(&unit_id, &req.report);
    Ok(Json(json!({ "status": "updated" })))
}
