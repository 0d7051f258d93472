//! Torrent processor worker pool.
//!
//! Consumes raw search hits, resolves their info-hashes, gates them on
//! IMDb/name relevance, and persists every (season, episode) expansion that
//! scores into the corpus. A per-GUID lock makes duplicate hits across
//! indexers process once.

use std::sync::Arc;
use std::time::Duration;

use db::events::{TorrentSearchCriteria, TorrentSearchResult};
use db::odm::{self, NewTorrent};
use db::{CacheTtl, Db, Keys};
use shared::config::ProcessorConfig;
use shared::error::{AppError, AppResult};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use torrent::{magnet, Category, TorrentMeta};
use tracing::{debug, error, info, warn};

const CONSUMER: &str = "torrent_processor";

/// Worker pool turning raw search hits into corpus entries.
#[derive(Clone)]
pub struct TorrentProcessor {
    db: Db,
    /// Redirect-following is disabled: a magnet resolution is exactly one
    /// request expecting a 302 with a `magnet:` Location.
    http: reqwest::Client,
    concurrency: usize,
    queue_depth: usize,
}

impl TorrentProcessor {
    pub fn new(config: &ProcessorConfig, db: Db) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.magnet_resolve_timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("http client: {err}")))?;
        Ok(Self {
            db,
            http,
            concurrency: config.concurrency,
            queue_depth: config.max_queue_depth,
        })
    }

    /// Consume search results until cancelled, respawning the pool if a
    /// task dies.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(workers = self.concurrency, "starting torrent processors");
        while !cancel.is_cancelled() {
            let child = cancel.child_token();
            let (tx, rx) = mpsc::channel::<TorrentSearchResult>(self.queue_depth);
            let rx = Arc::new(Mutex::new(rx));

            let mut tasks = tokio::task::JoinSet::new();
            {
                let db = self.db.clone();
                let token = child.clone();
                tasks.spawn(async move {
                    TorrentSearchResult::listen(&db, tx, CONSUMER, token).await;
                });
            }
            for _ in 0..self.concurrency {
                let processor = self.clone();
                let rx = rx.clone();
                let token = child.clone();
                tasks.spawn(async move {
                    processor.process_queue(rx, token).await;
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    child.cancel();
                    tasks.shutdown().await;
                    return;
                }
                _ = tasks.join_next() => {
                    error!("torrent processor exited unexpectedly, respawning");
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
        rx: Arc<Mutex<mpsc::Receiver<TorrentSearchResult>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let result = {
                let mut queue = rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = queue.recv() => result,
                }
            };
            let Some(result) = result else { return };

            // duplicates across indexers share a GUID; first taker wins
            let lock_key = Keys::torrent_processor_lock(&result.guid);
            match self.db.try_lock(&lock_key, CacheTtl::HOUR).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    error!(error = %err, "failed to take processing lock");
                    continue;
                }
            }

            debug!(guid = %result.guid, title = %result.title, "processing torrent");
            if let Err(err) = self.process_message(&result).await {
                error!(guid = %result.guid, error = %err, "torrent processing failed");
            }
        }
    }

    pub async fn process_message(&self, result: &TorrentSearchResult) -> AppResult<()> {
        let criteria = &result.search_criteria;
        if !result.imdb.is_empty() && !criteria.imdb.is_empty() && result.imdb != criteria.imdb {
            info!(wanted = %criteria.imdb, got = %result.imdb, "skipping mismatched IMDb");
            return Ok(());
        }

        let Some(info_hash) = self.resolve_info_hash(result).await else {
            debug!(guid = %result.guid, link = %result.magnet_link, "no info hash found");
            return Ok(());
        };

        let meta = TorrentMeta::parse(&result.title);
        if result.imdb != criteria.imdb && !meta.matches_name(&criteria.query) {
            info!(wanted = %criteria.query, got = %meta.title, "skipping mismatched title");
            return Ok(());
        }

        for entry in plan_store(&meta, criteria) {
            odm::add_torrent(
                &self.db,
                &NewTorrent {
                    info_hash: info_hash.clone(),
                    title: result.title.clone(),
                    imdb: criteria.imdb.clone(),
                    score: entry.score,
                    season: entry.season,
                    episode: entry.episode,
                    size: result.size,
                    indexer: result.indexer.clone(),
                    category: criteria.category,
                },
                CacheTtl::TORRENT,
            )
            .await?;
        }
        Ok(())
    }

    async fn resolve_info_hash(&self, result: &TorrentSearchResult) -> Option<String> {
        if !result.info_hash.is_empty() {
            return Some(result.info_hash.to_uppercase());
        }
        self.resolve_magnet_link(&result.guid, &result.magnet_link).await
    }

    /// The aggregator often has no magnet but a tracker URL that redirects
    /// to one. Resolve it with a single non-following request and cache the
    /// answer; failures drop the result, they are never retried here.
    async fn resolve_magnet_link(&self, guid: &str, link: &str) -> Option<String> {
        if link.starts_with("magnet:") {
            return magnet::parse_magnet_link(link);
        }
        if !link.starts_with("http") {
            return None;
        }

        let cache_key = Keys::magnet_resolve(guid);
        if let Ok(Some(info_hash)) = self.db.get(&cache_key).await {
            return Some(info_hash);
        }

        debug!(guid = %guid, link = %link, "magnet resolve: following redirect");
        let response = match self.http.get(link).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(guid = %guid, error = %err, "magnet resolve failed");
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::FOUND {
            warn!(guid = %guid, status = %response.status(), "magnet resolve: no redirect found");
            return None;
        }
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())?;
        let info_hash = magnet::parse_magnet_link(location)?;
        debug!(guid = %guid, info_hash = %info_hash, "magnet resolve: found redirect");
        let _ = self
            .db
            .set(&cache_key, &info_hash, Some(CacheTtl::TORRENT))
            .await;
        Some(info_hash)
    }
}

/// One planned corpus write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub score: i64,
}

/// Decide which keys a release lands under.
///
/// Movies store once when they score; season packs store under every season
/// they contain; episodic releases store under every (season, episode) in
/// the cartesian product that scores. Episodes with no season at all have
/// nowhere to land.
///
/// Scoring runs against the release's own title: the name gate belongs to
/// `process_message`, which skips it for IMDb-confirmed results, so store
/// planning must not re-apply it.
pub fn plan_store(meta: &TorrentMeta, criteria: &TorrentSearchCriteria) -> Vec<PlannedEntry> {
    match criteria.category {
        Category::Movie => {
            let score = meta.match_score(&meta.title, criteria.year, 0, 0);
            if score > 0 {
                vec![PlannedEntry {
                    season: None,
                    episode: None,
                    score,
                }]
            } else {
                debug!(title = %meta.raw_title, score, "movie scored too low");
                vec![]
            }
        }
        Category::Series if meta.episode.is_empty() => meta
            .season
            .iter()
            .map(|&season| PlannedEntry {
                season: Some(season),
                episode: None,
                score: meta.match_score(&meta.title, criteria.year, season, 0),
            })
            .collect(),
        Category::Series if !meta.season.is_empty() => {
            let mut entries = Vec::new();
            for &season in &meta.season {
                for &episode in &meta.episode {
                    let score = meta.match_score(&meta.title, criteria.year, season, episode);
                    if score > 0 {
                        entries.push(PlannedEntry {
                            season: Some(season),
                            episode: Some(episode),
                            score,
                        });
                    }
                }
            }
            entries
        }
        Category::Series => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(query: &str, category: Category, year: u32) -> TorrentSearchCriteria {
        TorrentSearchCriteria {
            imdb: "tt0111161".to_string(),
            query: query.to_string(),
            category,
            year,
        }
    }

    #[test]
    fn test_plan_store_movie() {
        let meta = TorrentMeta::parse("The Shawshank Redemption 1994 1080p BluRay x264");
        let planned = plan_store(&meta, &criteria("The Shawshank Redemption", Category::Movie, 1994));
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].season, None);
        assert_eq!(planned[0].episode, None);
        assert!(planned[0].score > 0);
    }

    #[test]
    fn test_plan_store_drops_featureless_movie() {
        // no resolution, no channels, no year match: nothing sets a score bit
        let meta = TorrentMeta::parse("Completely Ordinary Film DVDRip");
        let planned = plan_store(&meta, &criteria("Completely Ordinary Film", Category::Movie, 1994));
        assert!(planned.is_empty());
    }

    #[test]
    fn test_plan_store_season_pack_stores_per_season() {
        let meta = TorrentMeta::parse("Fargo S01-S05 2020 1080p WEB-DL");
        let planned = plan_store(&meta, &criteria("Fargo", Category::Series, 2020));
        assert_eq!(planned.len(), 5);
        for (index, entry) in planned.iter().enumerate() {
            assert_eq!(entry.season, Some(index as u32 + 1));
            assert_eq!(entry.episode, None);
            assert!(entry.score > 0, "season {} scored {}", index + 1, entry.score);
        }
    }

    #[test]
    fn test_plan_store_episodes_expand_cartesian() {
        let meta = TorrentMeta::parse("Fargo S01 E01-E05 2020 1080p WEB-DL");
        let planned = plan_store(&meta, &criteria("Fargo", Category::Series, 2020));
        assert_eq!(planned.len(), 5);
        for (index, entry) in planned.iter().enumerate() {
            assert_eq!(entry.season, Some(1));
            assert_eq!(entry.episode, Some(index as u32 + 1));
            assert!(entry.score > 0);
        }
    }

    #[test]
    fn test_plan_store_episode_without_season_is_dropped() {
        let meta = TorrentMeta::parse("Fargo E05 1080p");
        let planned = plan_store(&meta, &criteria("Fargo", Category::Series, 2020));
        assert!(planned.is_empty());
    }

    #[test]
    fn test_plan_store_does_not_reapply_name_gate() {
        // an IMDb-confirmed release whose title differs from the search
        // query still stores; the name gate already ran upstream
        let meta = TorrentMeta::parse("The Office S01E01 1080p");
        let planned = plan_store(&meta, &criteria("Fargo", Category::Series, 2020));
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].season, Some(1));
        assert_eq!(planned[0].episode, Some(1));
        assert!(planned[0].score > 0);
    }
}
