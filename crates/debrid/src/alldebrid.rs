//! AllDebrid provider.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::select::{pick_video_file, CandidateFile};
use crate::{DebridService, StreamLink};

const BASE_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "annatar";

#[derive(Clone)]
pub struct AllDebrid {
    http: reqwest::Client,
    api_key: String,
    #[allow(dead_code)]
    source_ip: String,
}

impl AllDebrid {
    pub fn new(http: reqwest::Client, api_key: &str, source_ip: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            source_ip: source_ip.to_string(),
        }
    }

    fn query(&self) -> [(&'static str, &str); 2] {
        [("agent", AGENT), ("apikey", self.api_key.as_str())]
    }

    /// Batch instant-availability check; only magnets flagged instant come
    /// back.
    async fn cached_magnets(&self, info_hashes: &[String]) -> Vec<AdMagnet> {
        let form: Vec<(&str, &str)> = info_hashes
            .iter()
            .map(|hash| ("magnets[]", hash.as_str()))
            .collect();
        let response = match self
            .http
            .post(format!("{BASE_URL}/magnet/instant"))
            .query(&self.query())
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "instant availability failed");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            error!(status = %response.status(), "instant availability error");
            return Vec::new();
        }
        let body: AdResponse<AdInstantData> = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "undecodable availability response");
                return Vec::new();
            }
        };
        if body.status != "success" {
            info!(status = %body.status, "failed to get cached torrents");
            return Vec::new();
        }
        body.data
            .map(|data| data.magnets.into_iter().filter(|m| m.instant).collect())
            .unwrap_or_default()
    }

    async fn magnet_status(&self, info_hash: &str) -> Option<AdStatusMagnet> {
        let response = self
            .http
            .get(format!("{BASE_URL}/magnet/status"))
            .query(&self.query())
            .send()
            .await
            .ok()?;
        let body: AdResponse<AdStatusData> = response.json().await.ok()?;
        body.data?
            .magnets
            .into_iter()
            .find(|m| m.hash.eq_ignore_ascii_case(info_hash))
    }

    async fn upload_magnet(&self, info_hash: &str) -> bool {
        match self
            .http
            .post(format!("{BASE_URL}/magnet/upload"))
            .query(&self.query())
            .form(&[("magnets[]", info_hash)])
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                error!(info_hash = %info_hash, error = %err, "failed to upload magnet");
                false
            }
        }
    }

    async fn unlock_link(&self, link: &str) -> Option<AdUnlockedLink> {
        let response = self
            .http
            .get(format!("{BASE_URL}/link/unlock"))
            .query(&self.query())
            .query(&[("link", link)])
            .send()
            .await
            .ok()?;
        let body: AdResponse<AdUnlockedLink> = response.json().await.ok()?;
        if body.status != "success" {
            info!(link = %link, "failed to unlock link");
            return None;
        }
        body.data
    }
}

#[async_trait]
impl DebridService for AllDebrid {
    fn id(&self) -> &'static str {
        "alldebrid"
    }

    fn name(&self) -> &'static str {
        "AllDebrid"
    }

    fn short_name(&self) -> &'static str {
        "AD"
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
            let cached = this.cached_magnets(&torrents).await;
            debug!(count = cached.len(), "got cached torrents");

            let mut yielded = 0usize;
            for magnet in cached {
                if stop.is_cancelled() {
                    break;
                }
                let files: Vec<CandidateFile> = magnet
                    .files
                    .iter()
                    .map(|file| CandidateFile {
                        id: file.name.clone(),
                        name: file.name.clone(),
                        size: file.size,
                    })
                    .collect();
                let Some(chosen) = pick_video_file(&files, season, episode) else {
                    debug!(info_hash = %magnet.hash, season, episode, "no matching file");
                    continue;
                };
                let link = StreamLink {
                    url: format!(
                        "/ad/{}/{}/{}",
                        this.api_key,
                        magnet.hash,
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

        let status = match self.magnet_status(info_hash).await {
            Some(status) => Some(status),
            None => {
                debug!(info_hash = %info_hash, "torrent not found, adding");
                if !self.upload_magnet(info_hash).await {
                    return None;
                }
                self.magnet_status(info_hash).await
            }
        }?;

        for file in status.links {
            if file.filename != file_name {
                continue;
            }
            let Some(unlocked) = self.unlock_link(&file.link).await else {
                info!(file = %file.filename, "failed to unlock link");
                continue;
            };
            return Some(StreamLink {
                url: unlocked.link,
                name: unlocked.filename,
                size: unlocked.filesize,
            });
        }
        None
    }
}

#[derive(Debug, Deserialize)]
struct AdResponse<T> {
    #[serde(default)]
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AdInstantData {
    #[serde(default)]
    magnets: Vec<AdMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdMagnet {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    instant: bool,
    #[serde(default)]
    files: Vec<AdFile>,
}

#[derive(Debug, Deserialize)]
struct AdFile {
    #[serde(rename = "n")]
    name: String,
    #[serde(default, rename = "s")]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct AdStatusData {
    #[serde(default)]
    magnets: Vec<AdStatusMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdStatusMagnet {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    links: Vec<AdStatusLink>,
}

#[derive(Debug, Deserialize)]
struct AdStatusLink {
    #[serde(default)]
    link: String,
    #[serde(default)]
    filename: String,
}

#[derive(Debug, Deserialize)]
struct AdUnlockedLink {
    #[serde(default)]
    link: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    filesize: u64,
}
