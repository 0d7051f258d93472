use std::sync::Arc;

use anyhow::{Context, Result};
use api::ApiState;
use db::Db;
use media::CinemetaClient;
use shared::config::Config;

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Handles the REST layer needs, shared with the worker pools
    pub api: Arc<ApiState>,
    pub registry: prometheus::Registry,
}

impl AppState {
    pub async fn new(config: Config, registry: prometheus::Registry) -> Result<Self> {
        let config = Arc::new(config);

        tracing::info!("Connecting to Redis...");
        let db = Db::connect(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let cinemeta = Arc::new(CinemetaClient::new(http.clone(), db.clone()));

        let api = Arc::new(ApiState {
            config: config.clone(),
            db,
            http,
            cinemeta,
        });

        Ok(Self {
            config,
            api,
            registry,
        })
    }

    /// Health check for the application
    pub async fn health_check(&self) -> HealthStatus {
        let mut status = HealthStatus::default();
        match self.api.db.ping().await {
            Ok(()) => status.redis = true,
            Err(err) => {
                tracing::error!("Redis health check failed: {}", err);
                status.redis = false;
            }
        }
        status.overall = status.redis;
        status
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HealthStatus {
    pub overall: bool,
    pub redis: bool,
}
