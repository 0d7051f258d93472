//! REST endpoints of the addon: manifest and stream resolution, the
//! diagnostics search, and internal playback redirects.

pub mod playback;
pub mod search;
pub mod streams;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;

use crate::ApiState;

/// Configure the addon's REST routes
pub fn configure_routes(app: Router<Arc<ApiState>>) -> Router<Arc<ApiState>> {
    app.merge(streams::routes())
        .merge(search::routes())
        .merge(playback::routes())
}

/// The client address debrid providers should see, honoring the
/// origin-forwarding configuration.
pub(crate) fn source_ip(state: &ApiState, headers: &HeaderMap) -> String {
    let config = &state.config.source_ip;
    if let Some(ip) = &config.override_origin_ip {
        return ip.clone();
    }
    if !config.forward_origin_ip {
        return String::new();
    }
    headers
        .get(config.origin_ip_header.as_str())
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}
