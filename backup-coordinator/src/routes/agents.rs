//! Agent transport: registration and heartbeat.

use crate::error::AppError;
use crate::models::agent::AgentRecord;
use crate::services::dispatch::RemoteAgentHandle;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use backup_agent::task::Capability;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    pub endpoint: String,
    pub capabilities: Vec<Capability>,
    pub max_concurrent_tasks: usize,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Value>, AppError> {
    if req.id.is_empty() {
        return Err(AppError::BadRequest("agent id is required".into()));
    }
    if req.max_concurrent_tasks == 0 {
        return Err(AppError::BadRequest(
            "max_concurrent_tasks must be at least 1".into(),
        ));
    }

    state.registry.register(AgentRecord::new(
        req.id.clone(),
        req.capabilities,
        req.max_concurrent_tasks,
        Some(req.endpoint.clone()),
    ));
    state
        .dispatch
        .insert(Arc::new(RemoteAgentHandle::new(req.id.clone(), req.endpoint)));

    state
        .ui
        .broadcast("agent:registered", json!({ "agentId": req.id }));
    state.saver.request_save();

    Ok(Json(json!({ "status": "registered" })))
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    #[serde(default)]
    pub current_tasks: usize,
    /// Reported load score; informational, the registry derives its
    /// own from the task count.
    #[serde(default)]
    pub load: f32,
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<Value>, AppError> {
    tracing::debug!(
        agent_id = %req.agent_id,
        current_tasks = req.current_tasks,
        load = req.load,
        "heartbeat received"
    );
    if state.registry.heartbeat(&req.agent_id, req.current_tasks) {
        Ok(Json(json!({ "status": "ok" })))
    } else {
        Err(AppError::NotFound(format!(
            "unknown agent: {}",
            req.agent_id
        )))
    }
}
