//! Internal playback redirects.
//!
//! Stream lists carry `/{provider}/{api_key}/{info_hash}/{file_id}` paths
//! for providers whose playback URLs are per-user; on playback the provider
//! resolves the file and the player is 302'd to the real URL.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use shared::error::AppError;

use super::source_ip;
use crate::ApiState;

pub fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/rd/:api_key/:info_hash/:file_id", get(playback_rd))
        .route("/ad/:api_key/:info_hash/:file_id", get(playback_ad))
        .route("/dl/:api_key/:info_hash/:file_id", get(playback_dl))
        .route("/pm/:api_key/:info_hash/:file_id", get(playback_pm))
        .route("/oc/:api_key/:info_hash/:file_id", get(playback_oc))
}

async fn playback_rd(
    state: State<Arc<ApiState>>,
    headers: HeaderMap,
    path: Path<(String, String, String)>,
) -> Result<Response, AppError> {
    resolve_playback(state, headers, "rd", path).await
}

async fn playback_ad(
    state: State<Arc<ApiState>>,
    headers: HeaderMap,
    path: Path<(String, String, String)>,
) -> Result<Response, AppError> {
    resolve_playback(state, headers, "ad", path).await
}

async fn playback_dl(
    state: State<Arc<ApiState>>,
    headers: HeaderMap,
    path: Path<(String, String, String)>,
) -> Result<Response, AppError> {
    resolve_playback(state, headers, "dl", path).await
}

async fn playback_pm(
    state: State<Arc<ApiState>>,
    headers: HeaderMap,
    path: Path<(String, String, String)>,
) -> Result<Response, AppError> {
    resolve_playback(state, headers, "pm", path).await
}

async fn playback_oc(
    state: State<Arc<ApiState>>,
    headers: HeaderMap,
    path: Path<(String, String, String)>,
) -> Result<Response, AppError> {
    resolve_playback(state, headers, "oc", path).await
}

/// Resolve an internal playback path by asking the provider for the real
/// URL, then 302 to it so the player follows through.
async fn resolve_playback(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    prefix: &'static str,
    Path((api_key, info_hash, file_id)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let provider_id = debrid::path_prefix_to_id(prefix)
        .ok_or_else(|| AppError::NotFound("Unknown provider".to_string()))?;
    let source_ip = source_ip(&state, &headers);
    let provider = debrid::build_provider(
        provider_id,
        &api_key,
        &source_ip,
        state.http.clone(),
        state.db.clone(),
    )
    .ok_or_else(|| AppError::NotFound("Unknown provider".to_string()))?;

    let stream = provider
        .get_stream_for_torrent(&info_hash, &file_id)
        .await
        .ok_or_else(|| AppError::NotFound("No stream found".to_string()))?;

    Ok((StatusCode::FOUND, [(header::LOCATION, stream.url)]).into_response())
}
