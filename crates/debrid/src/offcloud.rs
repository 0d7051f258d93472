//! OffCloud provider.

use async_trait::async_trait;
use serde::Deserialize;
use shared::human::is_video_file;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use torrent::{magnet, TorrentMeta};
use tracing::{debug, error};

use crate::{DebridService, StreamLink};

const BASE_URL: &str = "https://offcloud.com/api";

#[derive(Clone)]
pub struct OffCloud {
    http: reqwest::Client,
    api_key: String,
}

impl OffCloud {
    pub fn new(http: reqwest::Client, api_key: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
        }
    }

    async fn cached_hashes(&self, info_hashes: &[String]) -> Vec<String> {
        let response = match self
            .http
            .post(format!("{BASE_URL}/cache"))
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({ "hashes": info_hashes }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "cache check failed");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            error!(status = %response.status(), "cache check error");
            return Vec::new();
        }
        match response.json::<OcCacheResponse>().await {
            Ok(body) => body.cached_items,
            Err(err) => {
                debug!(error = %err, "undecodable cache response");
                Vec::new()
            }
        }
    }

    async fn add_magnet(&self, info_hash: &str) -> Option<OcAddResponse> {
        let response = self
            .http
            .post(format!("{BASE_URL}/cloud"))
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({ "url": magnet::make_magnet_link(info_hash) }))
            .send()
            .await
            .ok()?;
        let body: OcAddResponse = response.json().await.ok()?;
        if body.request_id.is_empty() {
            debug!(info_hash = %info_hash, "magnet not accepted");
            return None;
        }
        Some(body)
    }

    async fn request_status(&self, request_id: &str) -> Option<OcStatus> {
        let response = self
            .http
            .post(format!("{BASE_URL}/cloud/status"))
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({ "requestIds": [request_id] }))
            .send()
            .await
            .ok()?;
        let body: OcStatusResponse = response.json().await.ok()?;
        body.requests
            .into_iter()
            .find(|status| status.request_id == request_id)
    }

    async fn explore_links(&self, request_id: &str) -> Vec<String> {
        let response = match self
            .http
            .get(format!("{BASE_URL}/cloud/explore/{request_id}"))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(request_id = %request_id, error = %err, "explore failed");
                return Vec::new();
            }
        };
        response.json().await.unwrap_or_default()
    }

    /// Resolve one cached torrent to a direct download URL, following the
    /// folder listing when the torrent is a directory.
    async fn stream_link(&self, info_hash: &str, season: u32, episode: u32) -> Option<StreamLink> {
        let added = self.add_magnet(info_hash).await?;
        let status = self.request_status(&added.request_id).await?;

        if !status.is_directory {
            let url = format!(
                "https://{}.offcloud.com/cloud/download/{}/{}",
                status.server, added.request_id, status.file_name
            );
            return Some(StreamLink {
                url,
                name: status.file_name,
                size: status.file_size,
            });
        }

        for link in self.explore_links(&added.request_id).await {
            let name = link.rsplit('/').next().unwrap_or(&link).to_string();
            if !is_video_file(&name, status.file_size) {
                continue;
            }
            if season == 0 && episode == 0 {
                return Some(StreamLink {
                    url: link,
                    name,
                    size: status.file_size,
                });
            }
            let meta = TorrentMeta::parse(&name);
            if meta.is_season_episode(season, episode) {
                return Some(StreamLink {
                    url: link,
                    name,
                    size: status.file_size,
                });
            }
        }
        None
    }
}

#[async_trait]
impl DebridService for OffCloud {
    fn id(&self) -> &'static str {
        "offcloud"
    }

    fn name(&self) -> &'static str {
        "OffCloud"
    }

    fn short_name(&self) -> &'static str {
        "OC"
    }

    fn shared_cache(&self) -> bool {
        false
    }

    fn get_stream_links(
        &self,
        torrents: Vec<String>,
        season: u32,
        episode: u32,
        max_results: usize,
        stop: CancellationToken,
    ) -> mpsc::Receiver<StreamLink> {
        let (tx, rx) = mpsc::channel(1);
        let this = self.clone();
        tokio::spawn(async move {
            let cached = this.cached_hashes(&torrents).await;
            if cached.is_empty() {
                debug!("no available torrents");
                return;
            }

            let mut yielded = 0usize;
            for info_hash in cached {
                if stop.is_cancelled() {
                    break;
                }
                let Some(link) = this.stream_link(&info_hash, season, episode).await else {
                    continue;
                };
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    sent = tx.send(link) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                yielded += 1;
                if yielded >= max_results {
                    break;
                }
            }
        });
        rx
    }

    async fn get_stream_for_torrent(&self, info_hash: &str, file_id: &str) -> Option<StreamLink> {
        let file_name = urlencoding::decode(file_id).ok()?.into_owned();
        let link = self.stream_link(info_hash, 0, 0).await?;
        if link.name == file_name || file_name.is_empty() {
            Some(link)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct OcCacheResponse {
    #[serde(default, rename = "cachedItems")]
    cached_items: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OcAddResponse {
    #[serde(default, rename = "requestId")]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct OcStatusResponse {
    #[serde(default)]
    requests: Vec<OcStatus>,
}

#[derive(Debug, Deserialize)]
struct OcStatus {
    #[serde(default, rename = "requestId")]
    request_id: String,
    #[serde(default, rename = "fileName")]
    file_name: String,
    #[serde(default, rename = "fileSize")]
    file_size: u64,
    #[serde(default)]
    server: String,
    #[serde(default, rename = "isDirectory")]
    is_directory: bool,
}
