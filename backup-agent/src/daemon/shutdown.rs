//! Graceful shutdown on SIGTERM and SIGINT.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for SIGINT or SIGTERM, then cancel the given token so running
/// tasks can terminate their subprocesses and report `cancelled`.
pub async fn wait_for_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }

    cancel.cancel();
}
