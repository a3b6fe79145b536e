mod config;
mod error;
mod models;
mod routes;
mod services;
mod state;
mod utils;
mod ws;

use crate::config::CoordinatorConfig;
use crate::models::agent::AgentRecord;
use crate::models::session::Session;
use crate::services::coordinator::Coordinator;
use crate::services::dispatch::{Dispatch, LocalAgentHandle};
use crate::services::persist::{self, Snapshot, SnapshotSaver};
use crate::services::registry::AgentRegistry;
use crate::services::reporter::CoordinatorReporter;
use crate::services::resource::SystemResourceGate;
use crate::services::run_scheduler::RunScheduler;
use crate::services::store::TaskStore;
use crate::state::AppState;
use crate::utils::log_buffer::LogBuffer;
use crate::utils::speed_history::SpeedHistory;
use crate::ws::ui::UiBroadcaster;
use backup_agent::executor::Executor;
use backup_agent::report::StatusReporter;
use backup_agent::sync::SyncTool;
use backup_agent::task::Capability;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const LOCAL_AGENT_ID: &str = "local-worker";
const LOG_BUFFER_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = CoordinatorConfig::from_env();
    tracing::info!("starting backup coordinator on port {}", config.port);

    let store = Arc::new(TaskStore::new());
    let registry = Arc::new(AgentRegistry::new());
    let session = Arc::new(RwLock::new(Session::new()));

    // Pick up where a previous process left off.
    match Snapshot::load(&config.snapshot_path) {
        Ok(Some(mut snapshot)) => {
            snapshot.normalize_for_restore();
            persist::restore(snapshot, &store, &registry, &session);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("failed to load persisted state: {e}"),
    }

    let logs = LogBuffer::new(LOG_BUFFER_CAPACITY);
    let speeds = SpeedHistory::new();
    let ui = UiBroadcaster::new();
    let reporter = Arc::new(CoordinatorReporter::new(
        store.clone(),
        registry.clone(),
        session.clone(),
        logs.clone(),
        speeds.clone(),
        ui.clone(),
    ));

    // The in-process worker is just another agent behind the same
    // handoff interface as remote ones.
    let dispatch = Arc::new(Dispatch::new());
    let mut local_agent_id = None;
    if config.local_worker_concurrency > 0 {
        registry.register(AgentRecord::new(
            LOCAL_AGENT_ID,
            vec![Capability::Backup, Capability::Verify, Capability::Cleanup],
            config.local_worker_concurrency,
            None,
        ));
        let executor = Arc::new(Executor::new(SyncTool::new(
            config.sync_program.clone(),
            Duration::from_secs(config.sync_grace_secs),
        )));
        let dyn_reporter: Arc<dyn StatusReporter> = reporter.clone();
        dispatch.insert(Arc::new(LocalAgentHandle::new(
            LOCAL_AGENT_ID,
            executor,
            dyn_reporter,
            config.local_worker_concurrency,
        )));
        local_agent_id = Some(LOCAL_AGENT_ID.to_string());
    }

    let cancel = CancellationToken::new();

    let saver = Arc::new(SnapshotSaver::new(config.snapshot_path.clone()));
    {
        let saver = saver.clone();
        store.set_change_hook(Arc::new(move || saver.request_save()));
    }
    tokio::spawn(saver.clone().run(
        store.clone(),
        registry.clone(),
        session.clone(),
        cancel.clone(),
    ));

    let gate = Arc::new(SystemResourceGate::new(
        config.max_cpu_percent,
        config.max_memory_percent,
    ));
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        registry.clone(),
        dispatch.clone(),
        gate,
        session.clone(),
        logs.clone(),
        ui.clone(),
        config.backup_dest.clone(),
        Duration::from_secs(config.tick_interval_secs),
        Duration::from_secs(config.eviction_timeout_secs),
        local_agent_id,
    ));
    let coordinator_task = coordinator.spawn(cancel.clone());

    let state = Arc::new(AppState {
        store: store.clone(),
        registry: registry.clone(),
        dispatch,
        session: session.clone(),
        logs,
        speeds,
        ui,
        reporter,
        saver,
        config: config.clone(),
    });

    // Optional cron-triggered runs.
    let scheduler = match &config.schedule {
        Some(expr) => match RunScheduler::new(state.clone()).await {
            Ok(s) => {
                if let Err(e) = s.schedule(expr).await {
                    tracing::warn!("failed to install schedule: {e}");
                }
                if let Err(e) = s.start().await {
                    tracing::warn!("failed to start scheduler: {e}");
                }
                Some(s)
            }
            Err(e) => {
                tracing::warn!("failed to create scheduler: {e}");
                None
            }
        },
        None => None,
    };

    let app = routes::create_router(state.clone());
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("shutting down...");
    cancel.cancel();
    let _ = coordinator_task.await;

    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!("scheduler shutdown error: {e}");
        }
    }

    // One final consistent snapshot on the way out.
    let final_snapshot = {
        let session = session.read().unwrap().clone();
        Snapshot::capture(&session, &store, &registry)
    };
    if let Err(e) = final_snapshot.save(&config.snapshot_path) {
        tracing::warn!("failed to persist final snapshot: {e}");
    }

    tracing::info!("coordinator stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    cancel.cancel();
}
