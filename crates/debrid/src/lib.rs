//! Debrid provider integrations.
//!
//! One capability set, several services: check which torrents a provider
//! already has cached, pick the right file inside each, and turn it into a
//! playable URL. `get_stream_links` is a pull-based generator - a bounded
//! channel the caller drains at its own pace, with a cancellation token the
//! producer checks between per-torrent probes.

mod alldebrid;
mod debridlink;
mod offcloud;
mod premiumize;
mod realdebrid;
pub mod select;

use std::sync::Arc;

use async_trait::async_trait;
use db::Db;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use alldebrid::AllDebrid;
pub use debridlink::DebridLink;
pub use offcloud::OffCloud;
pub use premiumize::Premiumize;
pub use realdebrid::RealDebrid;
pub use select::{pick_video_file, CandidateFile};

/// A directly playable file a provider can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamLink {
    /// Absolute provider URL, or an internal `/{provider}/{key}/{hash}/{file}`
    /// path the HTTP layer resolves on playback
    pub url: String,
    /// File name shown to the user
    pub name: String,
    /// Bytes
    pub size: u64,
}

/// Uniform provider contract.
#[async_trait]
pub trait DebridService: Send + Sync {
    /// Stable short id used in config and internal paths.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// 2-3 letter tag shown in stream names.
    fn short_name(&self) -> &'static str;

    /// Whether the provider's instant-availability cache reports the same
    /// files regardless of whose token asks.
    fn shared_cache(&self) -> bool;

    /// Probe the given torrents for cached playable files, yielding links
    /// into a bounded channel. The producer must check `stop` between
    /// per-torrent probes and abandon outstanding work once it fires.
    fn get_stream_links(
        &self,
        torrents: Vec<String>,
        season: u32,
        episode: u32,
        max_results: usize,
        stop: CancellationToken,
    ) -> mpsc::Receiver<StreamLink>;

    /// Resolve one file of one torrent into a playable URL, used when an
    /// internal path from `get_stream_links` is requested for playback.
    async fn get_stream_for_torrent(&self, info_hash: &str, file_id: &str) -> Option<StreamLink>;
}

/// Short stable hash of a user's API token, used to key per-user caches
/// without storing the token itself.
pub fn token_hash(api_key: &str) -> String {
    let digest = Sha1::digest(api_key.as_bytes());
    hex::encode(&digest[..6])
}

/// Known providers as `(id, human name)` pairs.
pub fn list_providers() -> &'static [(&'static str, &'static str)] {
    &[
        ("real_debrid", "Real-Debrid"),
        ("alldebrid", "AllDebrid"),
        ("premiumize", "Premiumize.me"),
        ("debridlink", "Debrid-Link"),
        ("offcloud", "OffCloud"),
    ]
}

/// Map the short prefix used in internal playback paths (`/rd/...`) back to
/// a provider id.
pub fn path_prefix_to_id(prefix: &str) -> Option<&'static str> {
    match prefix {
        "rd" => Some("real_debrid"),
        "ad" => Some("alldebrid"),
        "pm" => Some("premiumize"),
        "dl" => Some("debridlink"),
        "oc" => Some("offcloud"),
        _ => None,
    }
}

/// Build the provider a user configured. Owned by the process entry point;
/// there is no global registry.
pub fn build_provider(
    provider_id: &str,
    api_key: &str,
    source_ip: &str,
    http: reqwest::Client,
    db: Db,
) -> Option<Arc<dyn DebridService>> {
    match provider_id {
        "real_debrid" => Some(Arc::new(RealDebrid::new(http, db, api_key, source_ip))),
        "alldebrid" => Some(Arc::new(AllDebrid::new(http, api_key, source_ip))),
        "premiumize" => Some(Arc::new(Premiumize::new(http, api_key))),
        "debridlink" => Some(Arc::new(DebridLink::new(http, api_key))),
        "offcloud" => Some(Arc::new(OffCloud::new(http, api_key))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hash_is_stable_and_short() {
        let first = token_hash("secret-token");
        let second = token_hash("secret-token");
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
        assert_ne!(first, token_hash("other-token"));
    }

    #[test]
    fn test_path_prefixes_cover_every_provider() {
        for prefix in ["rd", "ad", "pm", "dl", "oc"] {
            let id = path_prefix_to_id(prefix).expect(prefix);
            assert!(list_providers().iter().any(|(known, _)| *known == id));
        }
        assert_eq!(path_prefix_to_id("zz"), None);
    }
}
