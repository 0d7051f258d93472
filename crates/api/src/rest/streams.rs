//! Manifest and stream-resolution endpoints.

use std::sync::Arc;

use axum::extract::{Host, Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use regex::Regex;
use shared::error::AppError;
use torrent::Category;

use super::source_ip;
use crate::resolver::{self, ResolveRequest};
use crate::{stremio, ApiState, StreamResponse, UserConfig};

lazy_static! {
    static ref STREAM_ID: Regex = Regex::new(r"^(tt\d+)(?::(\d+):(\d+))?$").unwrap();
}

pub fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/manifest.json", get(manifest_default))
        .route("/:b64config/manifest.json", get(manifest_with_config))
        .route("/:b64config/stream/:media_type/:id", get(list_streams))
}

async fn manifest_default(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(stremio::manifest(&state.config.app, None))
}

async fn manifest_with_config(
    State(state): State<Arc<ApiState>>,
    Path(b64config): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = UserConfig::parse(&b64config)?;
    let short = state
        .provider(&user, "")
        .map(|provider| provider.short_name());
    Ok(Json(stremio::manifest(&state.config.app, short)))
}

/// Primary resolver entry: `/{b64config}/stream/{type}/{id}.json`.
async fn list_streams(
    State(state): State<Arc<ApiState>>,
    Host(host): Host,
    headers: HeaderMap,
    Path((b64config, media_type, id)): Path<(String, String, String)>,
) -> Result<Json<StreamResponse>, AppError> {
    let user = UserConfig::parse(&b64config)?;
    let category = Category::parse(&media_type)
        .ok_or_else(|| AppError::BadRequest("Unknown media type".to_string()))?;

    let id = id.strip_suffix(".json").unwrap_or(&id);
    let captures = STREAM_ID
        .captures(id)
        .ok_or_else(|| AppError::BadRequest("Invalid stream id".to_string()))?;
    let imdb = captures[1].to_string();
    let season_episode = captures.get(2).zip(captures.get(3)).map(|(s, e)| {
        (
            s.as_str().parse::<u32>().unwrap_or(0),
            e.as_str().parse::<u32>().unwrap_or(0),
        )
    });

    let (season, episode) = match category {
        Category::Movie => (0, 0),
        Category::Series => {
            let Some((season, episode)) = season_episode else {
                return Err(AppError::BadRequest(
                    "Season and episode required for series".to_string(),
                ));
            };
            // 0 means "not applicable" inside the core, so a season-0
            // ("specials") request cannot be represented and is rejected
            if season == 0 || episode == 0 {
                return Err(AppError::BadRequest(
                    "Season and episode must be positive".to_string(),
                ));
            }
            (season, episode)
        }
    };

    let source_ip = source_ip(&state, &headers);
    let provider = state
        .provider(&user, &source_ip)
        .ok_or_else(|| AppError::BadRequest("Unknown debrid service".to_string()))?;

    let request = ResolveRequest {
        category,
        imdb,
        season,
        episode,
        max_results: user.max_results,
        filters: torrent::filters::resolve(&user.filters),
    };
    let mut response = resolver::search(
        &state.db,
        &state.cinemeta,
        provider,
        state.config.search.timeout,
        &request,
    )
    .await;

    // absolutize internal playback paths against the caller
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    for stream in &mut response.streams {
        if stream.url.starts_with('/') {
            stream.url = format!("{scheme}://{host}{}", stream.url);
        }
    }

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_regex() {
        assert!(STREAM_ID.is_match("tt0111161"));
        assert!(STREAM_ID.is_match("tt0108778:5:10"));
        assert!(!STREAM_ID.is_match("tt0108778:5"));
        assert!(!STREAM_ID.is_match("movie-42"));
        assert!(!STREAM_ID.is_match("tt0108778:5:10:extra"));
    }

    #[test]
    fn test_stream_id_captures() {
        let captures = STREAM_ID.captures("tt0108778:5:10").unwrap();
        assert_eq!(&captures[1], "tt0108778");
        assert_eq!(&captures[2], "5");
        assert_eq!(&captures[3], "10");

        let captures = STREAM_ID.captures("tt0111161").unwrap();
        assert_eq!(&captures[1], "tt0111161");
        assert!(captures.get(2).is_none());
    }
}
