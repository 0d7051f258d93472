//! Jackett aggregator client.
//!
//! Searches are cached in the shared store for `JACKETT_CACHE_MINUTES` so
//! repeated lookups for a hot title do not hammer the aggregator, and calls
//! are rate limited the way the aggregator tolerates.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use db::{Db, Keys};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
use prometheus::{HistogramVec, Registry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::config::JackettConfig;
use shared::error::{AppError, AppResult};
use torrent::Category;
use tracing::{debug, warn};

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"\W").unwrap();
    static ref REQUEST_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "jackett_request_duration_seconds",
            "Duration of Jackett requests in seconds"
        ),
        &["indexer", "status", "cached"]
    )
    .unwrap();
}

/// Register this module's metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> anyhow::Result<()> {
    registry.register(Box::new(REQUEST_DURATION.clone()))?;
    Ok(())
}

/// One raw hit as the aggregator reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Guid")]
    pub guid: String,
    #[serde(default, rename = "Link")]
    pub link: Option<String>,
    #[serde(default, rename = "Size")]
    pub size: u64,
    #[serde(default, rename = "Imdb")]
    pub imdb: Option<u64>,
    #[serde(default, rename = "Seeders")]
    pub seeders: u32,
    #[serde(default, rename = "InfoHash")]
    pub info_hash: Option<String>,
    #[serde(default, rename = "Tracker")]
    pub tracker: Option<String>,
}

impl SearchResult {
    /// The declared IMDb id in `tt0000000` form, when present.
    pub fn imdb_tt(&self) -> Option<String> {
        self.imdb.filter(|id| *id > 0).map(|id| format!("tt{id:07}"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default, rename = "Results")]
    pub results: Vec<SearchResult>,
}

/// Jackett client shared by every indexer worker pool.
#[derive(Clone)]
pub struct JackettClient {
    http: reqwest::Client,
    db: Db,
    base_url: String,
    api_key: String,
    cache_ttl: Duration,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl JackettClient {
    pub fn new(config: &JackettConfig, db: Db) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("http client: {err}")))?;

        // Jackett is self-hosted but still chokes on bursts
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(5).unwrap(),
        )));

        Ok(Self {
            http,
            db,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            cache_ttl: config.cache_ttl,
            limiter,
        })
    }

    /// Torznab search by IMDb id. Failures are logged and come back empty;
    /// freshness is restored when the search lock expires.
    pub async fn search_imdb(
        &self,
        imdb: &str,
        category: Category,
        indexer: &str,
    ) -> SearchResponse {
        let mode = match category {
            Category::Movie => "movie",
            Category::Series => "tvsearch",
        };
        let params = vec![
            ("t".to_string(), mode.to_string()),
            ("imdbid".to_string(), imdb.to_string()),
            ("Category".to_string(), category.jackett_id().to_string()),
            ("Tracker[]".to_string(), indexer.to_string()),
        ];
        self.search_with(indexer, params).await
    }

    /// Free-text search; the query is sanitized to word characters because
    /// several indexers treat punctuation as syntax.
    pub async fn search_query(
        &self,
        query: &str,
        category: Category,
        indexer: &str,
    ) -> SearchResponse {
        let sanitized = NON_WORD.replace_all(query, " ").to_string();
        let params = vec![
            ("Category".to_string(), category.jackett_id().to_string()),
            ("Query".to_string(), sanitized),
            ("Tracker[]".to_string(), indexer.to_string()),
        ];
        self.search_with(indexer, params).await
    }

    async fn search_with(&self, indexer: &str, params: Vec<(String, String)>) -> SearchResponse {
        match self.make_request(indexer, params).await {
            Ok(response) => response,
            Err(err) => {
                warn!(indexer = %indexer, error = %err, "jackett search failed");
                SearchResponse::default()
            }
        }
    }

    async fn make_request(
        &self,
        indexer: &str,
        params: Vec<(String, String)>,
    ) -> AppResult<SearchResponse> {
        let fingerprint = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let cache_key = Keys::jackett_search(&fingerprint);

        let start = std::time::Instant::now();
        if let Some(cached) = self.db.get_json::<SearchResponse>(&cache_key).await? {
            debug!(indexer = %indexer, "jackett response cached");
            REQUEST_DURATION
                .with_label_values(&[indexer, "2xx", "true"])
                .observe(start.elapsed().as_secs_f64());
            return Ok(cached);
        }

        self.limiter.until_ready().await;

        let url = format!("{}/api/v2.0/indexers/all/results", self.base_url);
        let mut query = params;
        query.push(("apikey".to_string(), self.api_key.clone()));

        debug!(indexer = %indexer, "searching jackett");
        let response = self
            .http
            .get(&url)
            .query(&query)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let status_class = format!("{}xx", status.as_u16() / 100);
        REQUEST_DURATION
            .with_label_values(&[indexer, status_class.as_str(), "false"])
            .observe(start.elapsed().as_secs_f64());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(indexer = %indexer, status = %status, body = %body, "jackett returned an error");
            return Err(AppError::ExternalService(format!(
                "jackett search failed with {status}"
            )));
        }

        let parsed: SearchResponse = response.json().await?;
        self.db
            .set_json(&cache_key, &parsed, Some(self.cache_ttl))
            .await?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imdb_tt_zero_pads() {
        let result = SearchResult {
            title: "Friends S05E10".to_string(),
            guid: "guid".to_string(),
            link: None,
            size: 0,
            imdb: Some(108778),
            seeders: 0,
            info_hash: None,
            tracker: None,
        };
        assert_eq!(result.imdb_tt().as_deref(), Some("tt0108778"));
    }

    #[test]
    fn test_imdb_tt_absent() {
        let result = SearchResult {
            title: "Friends S05E10".to_string(),
            guid: "guid".to_string(),
            link: None,
            size: 0,
            imdb: None,
            seeders: 0,
            info_hash: None,
            tracker: None,
        };
        assert_eq!(result.imdb_tt(), None);
    }

    #[test]
    fn test_response_deserializes_aggregator_shape() {
        let json = r#"{"Results": [{"Title": "Friends S05E10 1080p", "Guid": "g1", "Size": 1000, "Seeders": 12, "Imdb": 108778}]}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].title, "Friends S05E10 1080p");
        assert_eq!(parsed.results[0].imdb_tt().as_deref(), Some("tt0108778"));
    }
}
