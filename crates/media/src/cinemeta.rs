//! Cinemeta client.

use db::{CacheTtl, Db, Keys};
use lazy_static::lazy_static;
use prometheus::{HistogramVec, Registry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use shared::error::AppResult;
use torrent::Category;
use tracing::{debug, warn};

const CINEMETA_BASE: &str = "https://v3-cinemeta.strem.io";

lazy_static! {
    static ref NON_DIGIT: Regex = Regex::new(r"\D").unwrap();
    static ref REQUEST_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cinemeta_request_duration_seconds",
            "Duration of Cinemeta requests in seconds"
        ),
        &["status"]
    )
    .unwrap();
}

/// Register this module's metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> anyhow::Result<()> {
    registry.register(Box::new(REQUEST_DURATION.clone()))?;
    Ok(())
}

/// Canonical title metadata as the catalog reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub name: String,
    /// "2000" for movies, "2000-2014" or "2000-" for shows. Cinemeta uses
    /// an en-dash in ranges, so year extraction splits on any non-digit.
    #[serde(default, rename = "releaseInfo")]
    pub release_info: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl MediaInfo {
    /// First year of the release span, if any.
    pub fn release_year(&self) -> Option<u32> {
        let info = self.release_info.as_deref()?;
        NON_DIGIT
            .split(info)
            .find(|part| !part.is_empty())
            .and_then(|part| part.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    meta: Option<MediaInfo>,
}

/// Cinemeta client with a month-long response cache in the shared store.
#[derive(Clone)]
pub struct CinemetaClient {
    http: reqwest::Client,
    db: Db,
    base_url: String,
}

impl CinemetaClient {
    pub fn new(http: reqwest::Client, db: Db) -> Self {
        Self {
            http,
            db,
            base_url: CINEMETA_BASE.to_string(),
        }
    }

    /// Look up canonical metadata for an IMDb id. `None` means the catalog
    /// does not know the title; errors from the catalog also come back as
    /// `None` after logging, the caller just drops the work item.
    pub async fn media_info(&self, category: Category, imdb: &str) -> AppResult<Option<MediaInfo>> {
        let cache_key = Keys::cinemeta(category.as_str(), imdb);
        if let Some(cached) = self.db.get_json::<MediaInfo>(&cache_key).await? {
            return Ok(Some(cached));
        }

        let Some(info) = self.fetch(category, imdb).await else {
            return Ok(None);
        };
        self.db
            .set_json(&cache_key, &info, Some(CacheTtl::MONTH))
            .await?;
        Ok(Some(info))
    }

    async fn fetch(&self, category: Category, imdb: &str) -> Option<MediaInfo> {
        let url = format!("{}/meta/{}/{}.json", self.base_url, category, imdb);
        let start = std::time::Instant::now();

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                REQUEST_DURATION
                    .with_label_values(&["error"])
                    .observe(start.elapsed().as_secs_f64());
                warn!(imdb = %imdb, error = %err, "cinemeta request failed");
                return None;
            }
        };
        let status_class = format!("{}xx", response.status().as_u16() / 100);
        REQUEST_DURATION
            .with_label_values(&[status_class.as_str()])
            .observe(start.elapsed().as_secs_f64());
        if !response.status().is_success() {
            warn!(imdb = %imdb, status = %response.status(), "cinemeta returned an error");
            return None;
        }
        match response.json::<MetaResponse>().await {
            Ok(body) => {
                if body.meta.is_none() {
                    debug!(imdb = %imdb, "no metadata for title");
                }
                body.meta
            }
            Err(err) => {
                warn!(imdb = %imdb, error = %err, "undecodable cinemeta response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(release_info: Option<&str>) -> MediaInfo {
        MediaInfo {
            id: "tt0108778".to_string(),
            name: "Friends".to_string(),
            release_info: release_info.map(str::to_string),
            description: None,
        }
    }

    #[test]
    fn test_release_year_single() {
        assert_eq!(info(Some("1994")).release_year(), Some(1994));
    }

    #[test]
    fn test_release_year_range_with_en_dash() {
        assert_eq!(info(Some("1994–2004")).release_year(), Some(1994));
        assert_eq!(info(Some("1994-")).release_year(), Some(1994));
    }

    #[test]
    fn test_release_year_absent() {
        assert_eq!(info(None).release_year(), None);
        assert_eq!(info(Some("")).release_year(), None);
        assert_eq!(info(Some("unknown")).release_year(), None);
    }

    #[test]
    fn test_media_info_deserializes_catalog_shape() {
        let json = r#"{"id": "tt0108778", "name": "Friends", "releaseInfo": "1994–2004"}"#;
        let parsed: MediaInfo = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.name, "Friends");
        assert_eq!(parsed.release_year(), Some(1994));
    }
}
