//! Shared application state.
//!
//! Everything is explicitly constructed in `main` and injected; there
//! are no ambient globals. The task store and agent registry are the
//! only mutable shared structures, and all mutation goes through their
//! synchronized operations.

use crate::config::CoordinatorConfig;
use crate::models::session::Session;
use crate::services::dispatch::Dispatch;
use crate::services::persist::SnapshotSaver;
use crate::services::registry::AgentRegistry;
use crate::services::reporter::CoordinatorReporter;
use crate::services::store::TaskStore;
use crate::utils::log_buffer::LogBuffer;
use crate::utils::speed_history::SpeedHistory;
use crate::ws::ui::UiBroadcaster;
use std::sync::{Arc, RwLock};

pub struct AppState {
    pub config: CoordinatorConfig,
    pub store: Arc<TaskStore>,
    pub registry: Arc<AgentRegistry>,
    pub dispatch: Arc<Dispatch>,
    pub session: Arc<RwLock<Session>>,
    pub logs: LogBuffer,
    pub speeds: SpeedHistory,
    pub ui: UiBroadcaster,
    pub reporter: Arc<CoordinatorReporter>,
    pub saver: Arc<SnapshotSaver>,
}
