pub mod agents;
pub mod control;
pub mod status;
pub mod tasks;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Dashboard surface
        .route("/api/status", get(status::get_status))
        .route("/api/logs", get(status::get_logs))
        .route("/api/control", post(control::control))
        .route("/api/select", post(control::select))
        .route("/api/dryrun", post(control::dry_run))
        .route("/ws", get(crate::ws::ui::ws_handler))
        // Agent transport
        .route("/api/agents/register", post(agents::register))
        .route("/api/agents/heartbeat", post(agents::heartbeat))
        .route("/api/tasks/{id}/progress", post(tasks::progress))
        .route("/api/tasks/{id}/complete", post(tasks::complete))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
