//! Stremio-facing API layer: the stream resolver, the REST endpoints of the
//! addon, its wire models, and the base64 user configuration.

pub mod resolver;
pub mod rest;
pub mod stremio;
pub mod user_config;

use std::sync::Arc;

use db::Db;
use debrid::DebridService;
use media::CinemetaClient;
use shared::Config;

pub use resolver::ResolveRequest;
pub use stremio::{Media, MediaResponse, Stream, StreamResponse};
pub use user_config::UserConfig;

/// API state shared across all REST handlers.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub db: Db,
    pub http: reqwest::Client,
    pub cinemeta: Arc<CinemetaClient>,
}

impl ApiState {
    /// Build the debrid provider a request configured.
    pub fn provider(
        &self,
        user: &UserConfig,
        source_ip: &str,
    ) -> Option<Arc<dyn DebridService>> {
        debrid::build_provider(
            &user.debrid_service,
            &user.debrid_api_key,
            source_ip,
            self.http.clone(),
            self.db.clone(),
        )
    }
}

/// Register every metric this crate owns with the given registry.
pub fn register_metrics(registry: &prometheus::Registry) -> anyhow::Result<()> {
    resolver::register_metrics(registry)
}
