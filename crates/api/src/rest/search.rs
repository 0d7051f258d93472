//! Diagnostics search endpoint: triggers a background refresh and lists the
//! stored corpus for a title.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use db::events::SearchRequest;
use db::odm;
use serde::Deserialize;
use shared::error::AppError;
use torrent::Category;

use crate::{ApiState, Media, MediaResponse};

pub fn routes() -> Router<Arc<ApiState>> {
    Router::new().route("/search/imdb/:category/:imdb_id", get(search_media))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    season: Option<u32>,
    episode: Option<u32>,
    limit: Option<usize>,
    instant: Option<bool>,
}

async fn search_media(
    State(state): State<Arc<ApiState>>,
    Path((category, imdb_id)): Path<(String, String)>,
    Query(params): Query<SearchParams>,
) -> Result<Json<MediaResponse>, AppError> {
    let category = Category::parse(&category)
        .ok_or_else(|| AppError::BadRequest("Unknown category".to_string()))?;

    SearchRequest {
        imdb: imdb_id.clone(),
        category,
        season: params.season,
        episode: params.episode,
    }
    .publish(&state.db)
    .await?;

    let limit = params.limit.unwrap_or(10);
    let mut hashes = odm::list_torrents(
        &state.db,
        &imdb_id,
        params.season,
        params.episode,
        &[],
        limit,
    )
    .await?;
    if hashes.is_empty() && !params.instant.unwrap_or(true) {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        hashes = odm::list_torrents(
            &state.db,
            &imdb_id,
            params.season,
            params.episode,
            &[],
            limit,
        )
        .await?;
    }

    let mut media = Vec::with_capacity(hashes.len());
    for hash in hashes {
        if let Some(title) = odm::get_torrent_title(&state.db, &hash).await? {
            media.push(Media { hash, title });
        }
    }
    Ok(Json(MediaResponse { media }))
}
