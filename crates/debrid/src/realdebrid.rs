//! Real-Debrid provider.
//!
//! Playback is a two-phase dance: at probe time the instant-availability
//! cache tells us which file ids are cached, and that set has to be
//! persisted because the unrestrict happens in a separate HTTP request. At
//! playback time the magnet is added, the remembered files are selected,
//! and the per-file link is unrestricted into a short-lived HTTPS URL.

use async_trait::async_trait;
use db::{CacheTtl, Db, Keys};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use torrent::magnet;
use tracing::{debug, error, info};

use crate::select::{pick_video_file, CandidateFile};
use crate::{token_hash, DebridService, StreamLink};

const ROOT_URL: &str = "https://api.real-debrid.com/rest/1.0";

#[derive(Clone)]
pub struct RealDebrid {
    http: reqwest::Client,
    db: Db,
    api_key: String,
    source_ip: String,
}

impl RealDebrid {
    pub fn new(http: reqwest::Client, db: Db, api_key: &str, source_ip: &str) -> Self {
        Self {
            http,
            db,
            api_key: api_key.to_string(),
            source_ip: source_ip.to_string(),
        }
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.bearer_auth(&self.api_key);
        if self.source_ip.is_empty() {
            request
        } else {
            request.query(&[("ip", self.source_ip.as_str())])
        }
    }

    /// Which files of a torrent the provider already has cached.
    async fn instant_availability(&self, info_hash: &str) -> Vec<CandidateFile> {
        let url = format!("{ROOT_URL}/torrents/instantAvailability/{info_hash}");
        let response = match self.auth(self.http.get(&url)).send().await {
            Ok(response) => response,
            Err(err) => {
                error!(info_hash = %info_hash, error = %err, "instant availability failed");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            error!(info_hash = %info_hash, status = %response.status(), "instant availability error");
            return Vec::new();
        }
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                debug!(info_hash = %info_hash, error = %err, "undecodable availability response");
                return Vec::new();
            }
        };

        // {"HASH": {"rd": [{"1": {"filename": ..., "filesize": ...}, ...}]}}
        let mut files = Vec::new();
        for value in body.as_object().into_iter().flat_map(|map| map.values()) {
            let Some(variants) = value.get("rd").and_then(|rd| rd.as_array()) else {
                continue;
            };
            for variant in variants {
                let Some(entries) = variant.as_object() else { continue };
                for (file_id, file_info) in entries {
                    let name = file_info
                        .get("filename")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let size = file_info
                        .get("filesize")
                        .and_then(|v| v.as_u64())
                        .unwrap_or_default();
                    files.push(CandidateFile {
                        id: file_id.clone(),
                        name,
                        size,
                    });
                }
            }
        }
        files
    }

    async fn add_magnet(&self, magnet_link: &str) -> Option<String> {
        let url = format!("{ROOT_URL}/torrents/addMagnet");
        let response = self
            .auth(self.http.post(&url))
            .form(&[("magnet", magnet_link)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            error!(status = %response.status(), "failed to add magnet");
            return None;
        }
        let body: AddMagnetResponse = response.json().await.ok()?;
        info!(torrent_id = %body.id, "magnet added");
        Some(body.id)
    }

    async fn select_files(&self, torrent_id: &str, file_ids: &str) -> bool {
        let url = format!("{ROOT_URL}/torrents/selectFiles/{torrent_id}");
        match self
            .auth(self.http.post(&url))
            .form(&[("files", file_ids)])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                error!(torrent_id = %torrent_id, status = %response.status(), "failed to select files");
                false
            }
            Err(err) => {
                error!(torrent_id = %torrent_id, error = %err, "failed to select files");
                false
            }
        }
    }

    async fn torrent_info(&self, torrent_id: &str) -> Option<TorrentInfo> {
        let url = format!("{ROOT_URL}/torrents/info/{torrent_id}");
        let response = self.auth(self.http.get(&url)).send().await.ok()?;
        if !response.status().is_success() {
            error!(torrent_id = %torrent_id, status = %response.status(), "failed to read torrent info");
            return None;
        }
        response.json().await.ok()
    }

    /// Poll until the torrent reports downloaded, up to 5 attempts with
    /// linear backoff.
    async fn await_downloaded(&self, torrent_id: &str) -> Option<TorrentInfo> {
        for attempt in 1..=5u64 {
            if let Some(info) = self.torrent_info(torrent_id).await {
                if info.status == "downloaded" && !info.links.is_empty() {
                    return Some(info);
                }
                debug!(torrent_id = %torrent_id, status = %info.status, attempt, "torrent not ready");
            }
            tokio::time::sleep(std::time::Duration::from_secs(attempt)).await;
        }
        error!(torrent_id = %torrent_id, "torrent never reached downloaded");
        None
    }

    async fn unrestrict(&self, link: &str) -> Option<UnrestrictedLink> {
        let url = format!("{ROOT_URL}/unrestrict/link");
        let response = self
            .auth(self.http.post(&url))
            .form(&[("link", link)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            error!(status = %response.status(), "failed to unrestrict link");
            return None;
        }
        response.json().await.ok()
    }
}

#[async_trait]
impl DebridService for RealDebrid {
    fn id(&self) -> &'static str {
        "real_debrid"
    }

    fn name(&self) -> &'static str {
        "real-debrid.com"
    }

    fn short_name(&self) -> &'static str {
        "RD"
    }

    fn shared_cache(&self) -> bool {
        true
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
            let mut yielded = 0usize;
            for info_hash in torrents {
                if stop.is_cancelled() {
                    debug!("stream link probing cancelled");
                    break;
                }
                let files = this.instant_availability(&info_hash).await;
                if files.is_empty() {
                    continue;
                }
                let Some(chosen) = pick_video_file(&files, season, episode) else {
                    debug!(info_hash = %info_hash, season, episode, "no matching file");
                    continue;
                };

                // the unrestrict arrives in a separate request; remember
                // which file ids were cached together
                let cached_ids = files
                    .iter()
                    .map(|file| file.id.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                let _ = this
                    .db
                    .set(
                        &Keys::rd_instant_file_set(&info_hash, &chosen.id),
                        &cached_ids,
                        Some(CacheTtl::TORRENT),
                    )
                    .await;

                let link = StreamLink {
                    url: format!("/rd/{}/{}/{}", this.api_key, info_hash, chosen.id),
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
        let cache_key =
            Keys::playback_link(self.id(), &token_hash(&self.api_key), info_hash, file_id);
        if let Ok(Some(cached)) = self.db.get_json::<StreamLink>(&cache_key).await {
            debug!(info_hash = %info_hash, "cached stream link");
            return Some(cached);
        }

        let file_set = self
            .db
            .get(&Keys::rd_instant_file_set(info_hash, file_id))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| file_id.to_string());

        let torrent_id = self.add_magnet(&magnet::make_magnet_link(info_hash)).await?;
        if !self.select_files(&torrent_id, &file_set).await {
            return None;
        }
        let info = self.await_downloaded(&torrent_id).await?;

        // links are ordered like the selected files
        let selected: Vec<&TorrentFile> =
            info.files.iter().filter(|file| file.selected == 1).collect();
        let index = selected
            .iter()
            .position(|file| file.id.to_string() == file_id)
            .unwrap_or(0);
        let link = info.links.get(index).or_else(|| info.links.first())?;

        let unrestricted = self.unrestrict(link).await?;
        let stream = StreamLink {
            url: unrestricted.download,
            name: unrestricted.filename,
            size: unrestricted.filesize,
        };
        let _ = self
            .db
            .set_json(&cache_key, &stream, Some(CacheTtl::SHORT))
            .await;
        Some(stream)
    }
}

#[derive(Debug, Deserialize)]
struct AddMagnetResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UnrestrictedLink {
    download: String,
    filename: String,
    filesize: u64,
}

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    files: Vec<TorrentFile>,
}

#[derive(Debug, Deserialize)]
struct TorrentFile {
    id: u64,
    #[serde(default)]
    selected: u8,
}
