//! Debrid-Link provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use torrent::magnet;
use tracing::{debug, error, info};

use crate::select::{pick_video_file, CandidateFile};
use crate::{DebridService, StreamLink};

const BASE_URL: &str = "https://debrid-link.com/api/v2";

#[derive(Clone)]
pub struct DebridLink {
    http: reqwest::Client,
    api_key: String,
}

impl DebridLink {
    pub fn new(http: reqwest::Client, api_key: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
        }
    }

    /// Batch cache check, keyed by the magnet URL we asked about.
    async fn cached_torrents(&self, info_hashes: &[String]) -> HashMap<String, DlCachedTorrent> {
        let magnets = info_hashes
            .iter()
            .map(|hash| magnet::make_magnet_link(hash))
            .collect::<Vec<_>>()
            .join(",");
        let response = match self
            .http
            .get(format!("{BASE_URL}/seedbox/cached"))
            .bearer_auth(&self.api_key)
            .query(&[("url", magnets.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "cache check failed");
                return HashMap::new();
            }
        };
        if !response.status().is_success() {
            error!(status = %response.status(), "cache check error");
            return HashMap::new();
        }
        let body: DlResponse<HashMap<String, DlCachedTorrent>> = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "undecodable cache response");
                return HashMap::new();
            }
        };
        if !body.success {
            info!("failed to get cached torrents");
            return HashMap::new();
        }
        body.value.unwrap_or_default()
    }

    async fn seedbox_list(&self) -> Vec<DlTorrent> {
        let response = match self
            .http
            .get(format!("{BASE_URL}/seedbox/list"))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "seedbox list failed");
                return Vec::new();
            }
        };
        let body: DlResponse<Vec<DlTorrent>> = match response.json().await {
            Ok(body) => body,
            Err(_) => return Vec::new(),
        };
        body.value.unwrap_or_default()
    }

    async fn add_torrent(&self, info_hash: &str) -> Option<DlTorrent> {
        let response = self
            .http
            .post(format!("{BASE_URL}/seedbox/add"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "url": magnet::make_magnet_link(info_hash) }))
            .send()
            .await
            .ok()?;
        let body: DlResponse<DlTorrent> = response.json().await.ok()?;
        body.value
    }
}

#[async_trait]
impl DebridService for DebridLink {
    fn id(&self) -> &'static str {
        "debridlink"
    }

    fn name(&self) -> &'static str {
        "Debrid-Link"
    }

    fn short_name(&self) -> &'static str {
        "DL"
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
            let cached = this.cached_torrents(&torrents).await;

            let mut yielded = 0usize;
            for (magnet_link, torrent) in cached {
                if stop.is_cancelled() {
                    break;
                }
                let Some(info_hash) = torrent
                    .hash_string
                    .clone()
                    .or_else(|| magnet::parse_magnet_link(&magnet_link))
                else {
                    continue;
                };
                let files: Vec<CandidateFile> = torrent
                    .files
                    .iter()
                    .map(|file| CandidateFile {
                        id: file.name.clone(),
                        name: file.name.clone(),
                        size: file.size,
                    })
                    .collect();
                let Some(chosen) = pick_video_file(&files, season, episode) else {
                    debug!(info_hash = %info_hash, season, episode, "no matching file");
                    continue;
                };
                let link = StreamLink {
                    url: format!(
                        "/dl/{}/{}/{}",
                        this.api_key,
                        info_hash,
                        urlencoding::encode(&chosen.name)
                    ),
                    name: chosen.name.clone(),
                    size: chosen.size,
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

        let existing = self
            .seedbox_list()
            .await
            .into_iter()
            .find(|torrent| {
                torrent
                    .hash_string
                    .as_deref()
                    .is_some_and(|hash| hash.eq_ignore_ascii_case(info_hash))
            });
        let torrent = match existing {
            Some(torrent) => torrent,
            None => {
                debug!(info_hash = %info_hash, "adding torrent");
                self.add_torrent(info_hash).await?
            }
        };

        torrent
            .files
            .into_iter()
            .find(|file| file.name == file_name)
            .map(|file| StreamLink {
                url: file.download_url,
                name: file.name,
                size: file.size,
            })
    }
}

#[derive(Debug, Deserialize)]
struct DlResponse<T> {
    #[serde(default)]
    success: bool,
    value: Option<T>,
}

#[derive(Debug, Deserialize)]
struct DlCachedTorrent {
    #[serde(default, rename = "hashString")]
    hash_string: Option<String>,
    #[serde(default)]
    files: Vec<DlFile>,
}

#[derive(Debug, Deserialize)]
struct DlTorrent {
    #[serde(default, rename = "hashString")]
    hash_string: Option<String>,
    #[serde(default)]
    files: Vec<DlSeedboxFile>,
}

#[derive(Debug, Deserialize)]
struct DlFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct DlSeedboxFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "downloadUrl")]
    download_url: String,
}
