//! Operator commands: start/pause/stop, unit selection, dry-run.

use crate::error::AppError;
use crate::services::orchestrator;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ControlRequest {
    pub action: String,
}

pub async fn control(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<Value>, AppError> {
    match req.action.as_str() {
        "start" => orchestrator::start_run(&state).await?,
        "pause" => orchestrator::pause_run(&state),
        "stop" => orchestrator::stop_run(&state).await,
        other => {
            return Err(AppError::BadRequest(format!("unknown action: {other}")));
        }
    }
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub selected: Vec<String>,
}

pub async fn select(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectRequest>,
) -> Json<Value> {
    orchestrator::select_units(&state, &req.selected);
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct DryRunRequest {
    #[serde(default)]
    pub enabled: bool,
}

pub async fn dry_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DryRunRequest>,
) -> Json<Value> {
    orchestrator::set_dry_run(&state, req.enabled);
    Json(json!({ "status": "ok" }))
}
