//! Status snapshot for the dashboard.

use crate::models::agent::AgentRecord;
use crate::models::session::{self, Session};
use crate::models::unit::BackupUnit;
use crate::state::AppState;
use crate::utils::log_buffer::LogEntry;
use crate::utils::speed_history::SpeedSample;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub session: Session,
    pub directories: Vec<BackupUnit>,
    pub total_size: u64,
    pub completed_size: u64,
    pub current_directory: Option<String>,
    pub next_directory: Option<String>,
    pub last_completed: Option<String>,
    pub agents: Vec<AgentRecord>,
    pub speed_history: Vec<SpeedSample>,
    pub logs: Vec<LogEntry>,
}

/// Latest known truth about the whole system, assembled from the task
/// store and registry at request time. The current/next/last-completed
/// conveniences are derived from the ordered unit list, never stored.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let units = state.store.snapshot();
    let session = state.session.read().unwrap().clone();

    Json(StatusResponse {
        current_directory: session::current_unit(&units).map(|u| u.name.clone()),
        next_directory: session::next_unit(&units).map(|u| u.name.clone()),
        last_completed: session::last_completed_unit(&units).map(|u| u.name.clone()),
        total_size: state.store.total_size(),
        completed_size: state.store.completed_size(),
        agents: state.registry.snapshot(),
        speed_history: state.speeds.recent(),
        logs: state.logs.tail(DEFAULT_LOG_TAIL, None),
        directories: units,
        session,
    })
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub level: Option<String>,
    pub limit: Option<usize>,
}

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let logs = state.logs.tail(
        query.limit.unwrap_or(DEFAULT_LOG_TAIL),
        query.level.as_deref(),
    );
    Json(serde_json::json!({ "logs": logs }))
}
