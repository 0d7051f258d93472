//! Premiumize provider.
//!
//! The directdl call both checks the cache and hands out direct HTTPS
//! links, so links from this provider skip the internal-redirect
//! indirection entirely.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use torrent::magnet;
use tracing::{debug, error};

use crate::select::{pick_video_file, CandidateFile};
use crate::{DebridService, StreamLink};

const BASE_URL: &str = "https://www.premiumize.me/api";

#[derive(Clone)]
pub struct Premiumize {
    http: reqwest::Client,
    api_key: String,
}

impl Premiumize {
    pub fn new(http: reqwest::Client, api_key: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
        }
    }

    /// Cached content of one torrent with direct links, empty when the
    /// torrent is not cached.
    async fn direct_download(&self, info_hash: &str) -> Vec<PmFile> {
        let magnet_link = magnet::make_magnet_link(info_hash);
        let response = match self
            .http
            .post(format!("{BASE_URL}/transfer/directdl"))
            .query(&[("apikey", self.api_key.as_str())])
            .form(&[("src", magnet_link.as_str())])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(info_hash = %info_hash, error = %err, "directdl failed");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            error!(info_hash = %info_hash, status = %response.status(), "directdl error");
            return Vec::new();
        }
        let body: PmDirectDlResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                debug!(info_hash = %info_hash, error = %err, "undecodable directdl response");
                return Vec::new();
            }
        };
        if body.status != "success" {
            debug!(info_hash = %info_hash, status = %body.status, "magnet has no cached content");
            return Vec::new();
        }
        body.content
    }

    fn candidates(files: &[PmFile]) -> Vec<CandidateFile> {
        files
            .iter()
            .map(|file| CandidateFile {
                id: file.path.clone(),
                name: file.path.clone(),
                size: file.size,
            })
            .collect()
    }
}

#[async_trait]
impl DebridService for Premiumize {
    fn id(&self) -> &'static str {
        "premiumize"
    }

    fn name(&self) -> &'static str {
        "Premiumize.me"
    }

    fn short_name(&self) -> &'static str {
        "PM"
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
                    break;
                }
                let files = this.direct_download(&info_hash).await;
                if files.is_empty() {
                    continue;
                }
                let candidates = Self::candidates(&files);
                let Some(chosen) = pick_video_file(&candidates, season, episode) else {
                    debug!(info_hash = %info_hash, season, episode, "no matching file");
                    continue;
                };
                let Some(file) = files.iter().find(|file| file.path == chosen.id) else {
                    continue;
                };
                let link = StreamLink {
                    url: file.link.clone(),
                    name: basename(&file.path).to_string(),
                    size: file.size,
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
        let files = self.direct_download(info_hash).await;
        files
            .iter()
            .find(|file| file.path == file_id || basename(&file.path) == file_id)
            .map(|file| StreamLink {
                url: file.link.clone(),
                name: basename(&file.path).to_string(),
                size: file.size,
            })
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Deserialize)]
struct PmDirectDlResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    content: Vec<PmFile>,
}

#[derive(Debug, Deserialize)]
struct PmFile {
    #[serde(default)]
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    link: String,
}
