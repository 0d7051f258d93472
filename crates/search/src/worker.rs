//! Per-indexer search worker pools.
//!
//! Each configured indexer gets its own pool consuming `SearchRequest`
//! events under its own consumer name. A per-indexer/per-title lock
//! coalesces repeat searches while the previous one is still fresh, and the
//! top-N cap keeps the processor queue bounded no matter how chatty an
//! indexer is.

use std::sync::Arc;
use std::time::Duration;

use db::events::{SearchRequest, TorrentSearchCriteria, TorrentSearchResult};
use db::{Db, Keys};
use futures::future::BoxFuture;
use futures::FutureExt;
use media::{CinemetaClient, MediaInfo};
use shared::config::{JackettConfig, SearchConfig};
use shared::error::AppResult;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use torrent::TorrentMeta;
use tracing::{debug, error, info};

use crate::client::{JackettClient, SearchResponse, SearchResult};

/// One worker pool bound to a single indexer.
#[derive(Clone)]
pub struct IndexerWorker {
    indexer: String,
    workers: usize,
    queue_size: usize,
    max_results: usize,
    lock_ttl: Duration,
    db: Db,
    jackett: Arc<JackettClient>,
    cinemeta: Arc<CinemetaClient>,
}

impl IndexerWorker {
    pub fn new(
        indexer: String,
        search: &SearchConfig,
        jackett_config: &JackettConfig,
        db: Db,
        jackett: Arc<JackettClient>,
        cinemeta: Arc<CinemetaClient>,
    ) -> Self {
        Self {
            indexer,
            workers: search.workers,
            // a little headroom over the worker count keeps the listener
            // from blocking on short bursts
            queue_size: search.workers * 5,
            max_results: jackett_config.max_results,
            lock_ttl: jackett_config.cache_ttl,
            db,
            jackett,
            cinemeta,
        }
    }

    /// Consume search requests until cancelled, respawning the pool if a
    /// task dies.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(indexer = %self.indexer, workers = self.workers, "starting indexer pool");
        while !cancel.is_cancelled() {
            let child = cancel.child_token();
            let (tx, rx) = mpsc::channel::<SearchRequest>(self.queue_size);
            let rx = Arc::new(Mutex::new(rx));

            let mut tasks = tokio::task::JoinSet::new();
            {
                let db = self.db.clone();
                let consumer = self.indexer.clone();
                let token = child.clone();
                tasks.spawn(async move {
                    SearchRequest::listen(&db, tx, &consumer, token).await;
                });
            }
            for _ in 0..self.workers {
                let worker = self.clone();
                let rx = rx.clone();
                let token = child.clone();
                tasks.spawn(async move {
                    worker.process_queue(rx, token).await;
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    child.cancel();
                    tasks.shutdown().await;
                    return;
                }
                _ = tasks.join_next() => {
                    error!(indexer = %self.indexer, "search worker exited unexpectedly, respawning");
                    child.cancel();
                    tasks.shutdown().await;
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }
    }

    async fn process_queue(
        &self,
        rx: Arc<Mutex<mpsc::Receiver<SearchRequest>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let request = {
                let mut queue = rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    request = queue.recv() => request,
                }
            };
            let Some(request) = request else { return };
            if let Err(err) = self.process_request(&request).await {
                error!(indexer = %self.indexer, imdb = %request.imdb, error = %err, "search request failed");
            }
        }
    }

    async fn process_request(&self, request: &SearchRequest) -> AppResult<()> {
        let lock_key = Keys::indexer_search_lock(&self.indexer, &request.imdb);
        if !self.db.try_lock(&lock_key, self.lock_ttl).await? {
            debug!(indexer = %self.indexer, imdb = %request.imdb, "previous search still fresh, dropping request");
            return Ok(());
        }

        let Some(media_info) = self.cinemeta.media_info(request.category, &request.imdb).await?
        else {
            debug!(imdb = %request.imdb, "no media info for title");
            return Ok(());
        };

        let results = self.search_all(request, &media_info).await;
        debug!(indexer = %self.indexer, count = results.len(), "jackett search completed");

        let mut sorted = results;
        sorted.sort_by_key(|result| prioritize(&media_info, request, result));
        sorted.truncate(self.max_results);

        for result in &sorted {
            self.publish_search_result(request, result, &media_info).await?;
        }
        Ok(())
    }

    /// Up to three concurrent searches: imdb id, canonical title, and the
    /// title with a season tag when the request names one.
    async fn search_all(&self, request: &SearchRequest, media_info: &MediaInfo) -> Vec<SearchResult> {
        let season_query = request
            .season
            .filter(|season| *season > 0)
            .map(|season| format!("{} S{season:02}", media_info.name));

        let mut searches: Vec<BoxFuture<'_, SearchResponse>> = vec![
            self.jackett
                .search_imdb(&request.imdb, request.category, &self.indexer)
                .boxed(),
            self.jackett
                .search_query(&media_info.name, request.category, &self.indexer)
                .boxed(),
        ];
        if let Some(query) = season_query.as_deref() {
            searches.push(
                self.jackett
                    .search_query(query, request.category, &self.indexer)
                    .boxed(),
            );
        }

        futures::future::join_all(searches)
            .await
            .into_iter()
            .flat_map(|response| response.results)
            .collect()
    }

    async fn publish_search_result(
        &self,
        request: &SearchRequest,
        result: &SearchResult,
        media_info: &MediaInfo,
    ) -> AppResult<()> {
        TorrentSearchResult {
            search_criteria: TorrentSearchCriteria {
                imdb: request.imdb.clone(),
                query: media_info.name.clone(),
                category: request.category,
                year: media_info.release_year().unwrap_or(0),
            },
            info_hash: result.info_hash.clone().unwrap_or_default().to_uppercase(),
            title: result.title.clone(),
            guid: result.guid.clone(),
            indexer: self.indexer.clone(),
            imdb: result.imdb_tt().unwrap_or_default(),
            magnet_link: result.link.clone().unwrap_or_default(),
            size: result.size,
            seeders: result.seeders,
        }
        .publish(&self.db)
        .await
    }
}

/// Coarse priority before the top-N cut: lower tuple sorts first. The
/// penalty drops when the parsed title matches the canonical name, when the
/// requested season tag is present, and when the declared IMDb id matches;
/// ties break on size, biggest first.
fn prioritize(media_info: &MediaInfo, request: &SearchRequest, result: &SearchResult) -> (i64, i64) {
    let mut penalty = 5i64;
    if TorrentMeta::parse(&result.title).matches_name(&media_info.name) {
        penalty -= 1;
    }
    if let Some(season) = request.season.filter(|s| *s > 0) {
        if result.title.contains(&format!("S{season:02}")) {
            penalty -= 1;
        }
    }
    if result.imdb_tt().as_deref() == Some(request.imdb.as_str()) {
        penalty -= 1;
    }
    (penalty, -(result.size as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(name: &str) -> MediaInfo {
        MediaInfo {
            id: "tt0108778".to_string(),
            name: name.to_string(),
            release_info: Some("1994".to_string()),
            description: None,
        }
    }

    fn result(title: &str, size: u64, imdb: Option<u64>) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            guid: title.to_string(),
            link: None,
            size,
            imdb,
            seeders: 0,
            info_hash: None,
            tracker: None,
        }
    }

    fn request(season: Option<u32>) -> SearchRequest {
        SearchRequest {
            imdb: "tt0108778".to_string(),
            category: torrent::Category::Series,
            season,
            episode: None,
        }
    }

    #[test]
    fn test_prioritize_prefers_matching_name_season_and_imdb() {
        let media_info = media("Friends");
        let req = request(Some(5));
        let mut results = vec![
            result("Some Other Show 1080p", 1 << 30, None),
            result("Friends S05 1080p", 100, Some(108778)),
            result("Friends 1080p", 100, None),
        ];
        results.sort_by_key(|r| prioritize(&media_info, &req, r));
        let ordered: Vec<&str> = results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            ordered,
            vec!["Friends S05 1080p", "Friends 1080p", "Some Other Show 1080p"]
        );
    }

    #[test]
    fn test_prioritize_breaks_ties_by_size() {
        let media_info = media("Friends");
        let req = request(None);
        let mut results = vec![
            result("Friends S05E01 1080p", 100, None),
            result("Friends S05E02 1080p", 1 << 30, None),
        ];
        results.sort_by_key(|r| prioritize(&media_info, &req, r));
        assert_eq!(results[0].title, "Friends S05E02 1080p");
    }
}
