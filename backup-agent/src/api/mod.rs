//! Task handoff API.
//!
//! The coordinator offers claimed units to this agent over HTTP; the
//! agent accepts when it has capacity and rejects with 503 otherwise.
//! Acceptance means the task runs to a terminal outcome and is reported
//! back asynchronously.

pub mod job_tracker;

use crate::config::Config;
use crate::executor::Executor;
use crate::report::HttpReporter;
use crate::task::TaskDescriptor;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use job_tracker::JobTracker;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AgentState {
    pub config: Config,
    pub tracker: JobTracker,
    pub reporter: Arc<HttpReporter>,
    pub executor: Arc<Executor>,
}

pub fn create_router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/api/task", post(handle_task_assignment))
        .route("/api/tasks/{id}/cancel", post(handle_task_cancel))
        .route("/api/status", get(handle_status))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_task_assignment(
    State(state): State<Arc<AgentState>>,
    Json(task): Json<TaskDescriptor>,
) -> impl IntoResponse {
    if !state
        .config
        .worker
        .capabilities
        .contains(&task.required_capability)
    {
        warn!(task = %task.name, capability = ?task.required_capability, "rejecting task: capability not offered");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "capability not offered by this agent" })),
        );
    }

    let token = CancellationToken::new();
    let admitted = state
        .tracker
        .try_register(
            &task.id,
            token.clone(),
            state.config.worker.max_concurrent_tasks,
        )
        .await;

    if !admitted {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "agent at capacity" })),
        );
    }

    info!(task = %task.name, task_id = %task.id, "accepted task handoff");

    let run_state = state.clone();
    tokio::spawn(async move {
        let outcome = run_state
            .executor
            .execute(&task, run_state.reporter.as_ref(), token)
            .await;
        run_state.tracker.finish(&task.id).await;
        info!(task = %task.name, ?outcome, "task finished");
    });

    (StatusCode::OK, Json(json!({ "status": "accepted" })))
}

async fn handle_task_cancel(
    State(state): State<Arc<AgentState>>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    if state.tracker.cancel(&task_id).await {
        (StatusCode::OK, Json(json!({ "status": "cancelling" })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no such running task" })),
        )
    }
}

async fn handle_status(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let current = state.tracker.running_count().await;
    Json(json!({
        "agent_id": state.config.agent.id,
        "current_tasks": current,
        "max_concurrent_tasks": state.config.worker.max_concurrent_tasks,
        "capabilities": state.config.worker.capabilities,
        "status": "active",
    }))
}
