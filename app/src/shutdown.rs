use tokio_util::sync::CancellationToken;

/// Wait for SIGTERM or Ctrl+C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}

/// Stop the background worker pools and flush telemetry.
pub async fn shutdown_sequence(cancel: CancellationToken, timeout_secs: u64) {
    tracing::info!("Stopping worker pools...");
    cancel.cancel();

    // workers observe cancellation at their next suspension point
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    tracing::info!(
        "Waiting up to {}s for in-flight work to finish...",
        timeout_secs
    );
    crate::telemetry::shutdown_telemetry();
    tracing::info!("Shutdown sequence completed");
}
