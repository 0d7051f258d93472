mod middleware;
mod routes;
mod shutdown;
mod state;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use search::{IndexerWorker, JackettClient, TorrentProcessor};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = shared::Config::from_env().context("Failed to load configuration")?;

    telemetry::init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;
    let registry =
        telemetry::metrics::build_registry().context("Failed to initialize metrics")?;

    tracing::info!("Starting {}...", config.app.name);

    let app_state = Arc::new(
        state::AppState::new(config.clone(), registry)
            .await
            .context("Failed to initialize application state")?,
    );

    // Background worker pools: one per indexer, plus the torrent processors
    let cancel = CancellationToken::new();
    let jackett = Arc::new(
        JackettClient::new(&config.jackett, app_state.api.db.clone())
            .context("Failed to build Jackett client")?,
    );
    let mut workers = Vec::new();
    for indexer in &config.jackett.indexers {
        let worker = IndexerWorker::new(
            indexer.clone(),
            &config.search,
            &config.jackett,
            app_state.api.db.clone(),
            jackett.clone(),
            app_state.api.cinemeta.clone(),
        );
        let token = cancel.child_token();
        workers.push(tokio::spawn(async move { worker.run(token).await }));
    }
    {
        let processor = TorrentProcessor::new(&config.processor, app_state.api.db.clone())
            .context("Failed to build torrent processor")?;
        let token = cancel.child_token();
        workers.push(tokio::spawn(async move { processor.run(token).await }));
    }
    tracing::info!(
        indexers = config.jackett.indexers.len(),
        processors = config.processor.concurrency,
        "Worker pools started"
    );

    let app = routes::build_router(app_state.clone())
        .layer(middleware::create_cors_layer(&config.cors))
        .layer(middleware::create_trace_layer());

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {address}"))?;
    tracing::info!("Server listening on http://{}", address);
    tracing::info!("Manifest: http://{}/manifest.json", address);
    tracing::info!("Metrics: http://{}/metrics", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .context("Server error")?;

    shutdown::shutdown_sequence(cancel, config.server.graceful_shutdown_timeout_secs).await;
    for worker in workers {
        worker.abort();
    }
    tracing::info!("{} stopped", config.app.name);

    Ok(())
}
