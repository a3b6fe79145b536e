//! Cron-triggered backup runs.

use crate::models::session::SessionState;
use crate::services::orchestrator;
use crate::state::AppState;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct RunScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl RunScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    /// Start a run on the cron cadence, unless one is already active.
    pub async fn schedule(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                let current = state.session.read().unwrap().state;
                if current != SessionState::Stopped {
                    tracing::warn!("skipping scheduled run: session already active");
                    return;
                }

                tracing::info!("starting scheduled backup run");
                if let Err(e) = orchestrator::start_run(&state).await {
                    tracing::error!("scheduled run failed to start: {e}");
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "backup schedule installed");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
