//! Backup agent - main entry point.
//!
//! Standalone execution agent: registers with the coordinator, accepts
//! task handoffs over HTTP, runs the external sync tool for each one,
//! and reports progress and completion back.

use anyhow::Result;
use backup_agent::api::{self, job_tracker::JobTracker, AgentState};
use backup_agent::config::Config;
use backup_agent::daemon::shutdown;
use backup_agent::enroll::Enrollment;
use backup_agent::executor::Executor;
use backup_agent::report::HttpReporter;
use backup_agent::sync::SyncTool;
use backup_agent::utils;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Coordinator base URL (overrides config)
    #[arg(long)]
    coordinator_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.agent.port = port;
    }
    if let Some(url) = args.coordinator_url {
        config.coordinator.url = url;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "starting backup-agent v{} (agent_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.id
    );

    let sync = SyncTool::new(
        config.sync.program.clone(),
        Duration::from_secs(config.sync.grace_period_secs),
    );
    let reporter = Arc::new(HttpReporter::new(
        config.coordinator.url.clone(),
        config.agent.id.clone(),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.agent.port));
    let state = Arc::new(AgentState {
        config,
        tracker: JobTracker::new(),
        reporter,
        executor: Arc::new(Executor::new(sync)),
    });

    let cancel = CancellationToken::new();

    // Register, then keep the coordinator informed of our load.
    let enrollment = Enrollment::new(state.clone());
    let enroll_cancel = cancel.clone();
    let enroll_task = tokio::spawn(async move {
        enrollment.register_with_retry(&enroll_cancel).await;
        enrollment.heartbeat_loop(enroll_cancel).await;
    });

    let app = api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_signal(cancel.clone()))
        .await?;

    // Terminate any in-flight sync subprocesses; they report cancelled.
    state.tracker.cancel_all().await;
    cancel.cancel();
    enroll_task.abort();
    tracing::info!("agent stopped");

    Ok(())
}
