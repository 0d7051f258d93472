//! Scored torrent corpus over the shared store.
//!
//! Torrents live in per-title sorted sets scored by match score; a small
//! hash per info-hash carries the raw title. Set TTLs refresh on read so
//! titles people actually watch stay warm while forgotten ones expire.

use std::collections::HashSet;
use std::time::Duration;

use shared::error::AppResult;
use torrent::filters::Filter;
use torrent::score::get_resolution;
use torrent::{magnet, Category, Resolution, TorrentMeta};
use tracing::{debug, info};

use crate::events::TorrentAdded;
use crate::keys::Keys;
use crate::redis::{CacheTtl, Db};

/// A torrent entry headed for the corpus.
#[derive(Debug, Clone)]
pub struct NewTorrent {
    pub info_hash: String,
    pub title: String,
    pub imdb: String,
    pub score: i64,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub size: u64,
    pub indexer: String,
    pub category: Category,
}

/// Add a torrent to the appropriate scored set and record its title.
/// Publishes [`TorrentAdded`] only when the entry is new, so a re-add with
/// an unchanged score stays silent.
pub async fn add_torrent(db: &Db, entry: &NewTorrent, ttl: Duration) -> AppResult<bool> {
    let info_hash = entry.info_hash.to_uppercase();
    let key = Keys::torrents(&entry.imdb, entry.season, entry.episode);

    let added = db.zadd(&key, &info_hash, entry.score).await?;
    if !ttl.is_zero() {
        db.set_ttl(&key, ttl).await?;
    }

    if added {
        debug!(info_hash = %info_hash, title = %entry.title, imdb = %entry.imdb, "added torrent");
        set_torrent_title(db, &info_hash, &entry.title).await?;
        TorrentAdded {
            info_hash: info_hash.clone(),
            title: entry.title.clone(),
            imdb: entry.imdb.clone(),
            size: entry.size,
            indexer: entry.indexer.clone(),
            category: entry.category,
            season: entry.season,
            episode: entry.episode,
        }
        .publish(db)
        .await?;
    }
    Ok(added)
}

/// List stored info-hashes for a title, best match first.
///
/// Unions the `(imdb, season, episode)` and `(imdb, season)` sets so season
/// packs surface for episode requests. Entries that are not 40-hex info
/// hashes are discarded. When exclusion filters are supplied, an entry is
/// dropped if any filter matches its parsed meta; resolution filters are
/// answered straight from the score bits without touching the title.
pub async fn list_torrents(
    db: &Db,
    imdb: &str,
    season: Option<u32>,
    episode: Option<u32>,
    filters: &[Filter],
    limit: usize,
) -> AppResult<Vec<String>> {
    let mut keys = vec![Keys::torrents(imdb, season, episode)];
    let season_key = Keys::torrents(imdb, season, None);
    if !keys.contains(&season_key) {
        keys.push(season_key);
    }
    debug!(keys = ?keys, "looking up torrents");

    let mut items = Vec::new();
    for key in &keys {
        match db.zrange_desc(key, 0, limit).await {
            Ok(mut chunk) => items.append(&mut chunk),
            Err(err) => debug!(key = %key, error = %err, "failed to read torrent list"),
        }
    }
    // Strict score order; ties break lexicographically on the hash
    items.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.value.cmp(&b.value)));

    let (resolution_filters, quality_filters): (Vec<_>, Vec<_>) = filters
        .iter()
        .partition(|filter| filter.category == "Resolution");

    let mut seen: HashSet<String> = HashSet::new();
    let mut results = Vec::new();
    for item in items {
        let info_hash = item.value.to_uppercase();
        if !magnet::is_info_hash(&info_hash) {
            debug!(value = %item.value, "discarding corrupt corpus entry");
            continue;
        }
        if !seen.insert(info_hash.clone()) {
            continue;
        }
        if dropped_by_resolution(item.score, &resolution_filters) {
            continue;
        }
        if !quality_filters.is_empty() {
            if let Some(title) = get_torrent_title(db, &info_hash).await? {
                let meta = TorrentMeta::parse(&title);
                if quality_filters.iter().any(|filter| (filter.apply)(&meta)) {
                    continue;
                }
            }
        }
        results.push(info_hash);
        if results.len() >= limit {
            break;
        }
    }

    if !results.is_empty() {
        // hot titles stay warm
        for key in &keys {
            let _ = db.set_ttl(key, CacheTtl::TORRENT).await;
        }
    }
    info!(count = results.len(), imdb = %imdb, "found torrents");
    Ok(results)
}

/// Answer resolution exclusions from the packed score, without re-parsing.
fn dropped_by_resolution(score: i64, filters: &[&Filter]) -> bool {
    if filters.is_empty() {
        return false;
    }
    let id = match get_resolution(score) {
        Some(Resolution::K4) => "4k",
        Some(Resolution::Qhd) => "qhd",
        Some(Resolution::P1080) => "1080p",
        Some(Resolution::P720) => "720p",
        Some(_) => return false,
        None => "unknown_resolution",
    };
    filters.iter().any(|filter| filter.id == id)
}

pub async fn set_torrent_title(db: &Db, info_hash: &str, title: &str) -> AppResult<bool> {
    db.hset(&Keys::torrent_meta(info_hash), "title", title).await
}

pub async fn get_torrent_title(db: &Db, info_hash: &str) -> AppResult<Option<String>> {
    db.hget(&Keys::torrent_meta(info_hash), "title").await
}

pub async fn set_torrent_meta(
    db: &Db,
    info_hash: &str,
    entries: &[(String, String)],
) -> AppResult<()> {
    db.hset_multiple(&Keys::torrent_meta(info_hash), entries).await
}

pub async fn get_torrent_meta(
    db: &Db,
    info_hash: &str,
) -> AppResult<std::collections::HashMap<String, String>> {
    db.hgetall(&Keys::torrent_meta(info_hash)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrent::filters;

    #[test]
    fn test_dropped_by_resolution() {
        let four_k = filters::by_id("4k").unwrap();
        let unknown = filters::by_id("unknown_resolution").unwrap();
        let selected = [&four_k, &unknown];

        let meta = TorrentMeta::parse("Friends S05E10 2160p");
        let packed = meta.match_score("Friends", 0, 5, 10);
        assert!(dropped_by_resolution(packed, &selected));

        let meta = TorrentMeta::parse("Friends S05E10 1080p");
        let packed = meta.match_score("Friends", 0, 5, 10);
        assert!(!dropped_by_resolution(packed, &selected));

        let meta = TorrentMeta::parse("Friends S05E10");
        let packed = meta.match_score("Friends", 0, 5, 10);
        assert!(dropped_by_resolution(packed, &selected));
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_add_torrent_is_idempotent() {
        let db = Db::connect("redis://localhost:6379").await.unwrap();
        let imdb = format!("tt{}", &uuid::Uuid::new_v4().simple().to_string()[..7]);
        let entry = NewTorrent {
            info_hash: "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef".to_string(),
            title: "Friends S05E10 1080p".to_string(),
            imdb: imdb.clone(),
            score: 100,
            season: Some(5),
            episode: Some(10),
            size: 1024,
            indexer: "test".to_string(),
            category: Category::Series,
        };

        assert!(add_torrent(&db, &entry, CacheTtl::HOUR).await.unwrap());
        assert!(!add_torrent(&db, &entry, CacheTtl::HOUR).await.unwrap());

        let listed = list_torrents(&db, &imdb, Some(5), Some(10), &[], 10)
            .await
            .unwrap();
        assert_eq!(listed, vec![entry.info_hash.to_uppercase()]);
    }
}
