//! Typed payloads carried on the pub/sub bus.

use serde::{Deserialize, Deserializer, Serialize};
use shared::error::AppResult;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use torrent::Category;

use crate::pubsub::{self, Topic};
use crate::redis::Db;

fn upper_case<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    // info-hashes must compare case-insensitively; canonical form is upper
    let value = String::deserialize(deserializer)?;
    Ok(value.to_uppercase())
}

/// A stream request fanned out to every indexer worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub imdb: String,
    pub category: Category,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episode: Option<u32>,
}

impl SearchRequest {
    pub async fn publish(&self, db: &Db) -> AppResult<()> {
        pubsub::publish(db, Topic::SearchRequest, self).await
    }

    pub async fn listen(
        db: &Db,
        queue: mpsc::Sender<SearchRequest>,
        consumer: &str,
        cancel: CancellationToken,
    ) {
        pubsub::consume_topic(db, Topic::SearchRequest, queue, consumer, cancel).await;
    }
}

/// What the originating search was looking for; travels with every hit so
/// the processor can re-check relevance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentSearchCriteria {
    pub imdb: String,
    pub query: String,
    pub category: Category,
    #[serde(default)]
    pub year: u32,
}

/// One raw indexer hit on its way to the torrent processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentSearchResult {
    pub search_criteria: TorrentSearchCriteria,
    #[serde(default, deserialize_with = "upper_case")]
    pub info_hash: String,
    pub title: String,
    pub guid: String,
    #[serde(default)]
    pub indexer: String,
    #[serde(default)]
    pub imdb: String,
    #[serde(default)]
    pub magnet_link: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub seeders: u32,
}

impl TorrentSearchResult {
    pub async fn publish(&self, db: &Db) -> AppResult<()> {
        pubsub::publish(db, Topic::TorrentSearchResult, self).await
    }

    pub async fn listen(
        db: &Db,
        queue: mpsc::Sender<TorrentSearchResult>,
        consumer: &str,
        cancel: CancellationToken,
    ) {
        pubsub::consume_topic(db, Topic::TorrentSearchResult, queue, consumer, cancel).await;
    }
}

/// Emitted after a torrent lands in the corpus; wakes waiting resolvers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentAdded {
    #[serde(deserialize_with = "upper_case")]
    pub info_hash: String,
    pub title: String,
    pub imdb: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub indexer: String,
    pub category: Category,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episode: Option<u32>,
}

impl TorrentAdded {
    pub async fn publish(&self, db: &Db) -> AppResult<()> {
        pubsub::publish(db, Topic::TorrentAdded, self).await
    }

    pub async fn listen(
        db: &Db,
        queue: mpsc::Sender<TorrentAdded>,
        consumer: &str,
        cancel: CancellationToken,
    ) {
        pubsub::consume_topic(db, Topic::TorrentAdded, queue, consumer, cancel).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hash_upper_cased_on_deserialize() {
        let json = r#"{
            "search_criteria": {"imdb": "tt0108778", "query": "Friends", "category": "series", "year": 1994},
            "info_hash": "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
            "title": "Friends S05E10 1080p",
            "guid": "abc123"
        }"#;
        let result: TorrentSearchResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.info_hash, "DEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF");
        assert_eq!(result.search_criteria.category, Category::Series);
        assert_eq!(result.size, 0);
    }

    #[test]
    fn test_search_request_round_trips() {
        let request = SearchRequest {
            imdb: "tt0108778".to_string(),
            category: Category::Series,
            season: Some(5),
            episode: Some(10),
        };
        let json = serde_json::to_string(&request).unwrap();
        let parsed: SearchRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.imdb, request.imdb);
        assert_eq!(parsed.season, Some(5));
    }
}
