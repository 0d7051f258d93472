//! Uniform key layout over the shared store.
//!
//! Every key the addon reads or writes is built here so the layout stays in
//! one place.

/// Cache key builder helper
pub struct Keys;

impl Keys {
    /// Per-title scored torrent list, optionally narrowed to a season or a
    /// season+episode.
    pub fn torrents(imdb: &str, season: Option<u32>, episode: Option<u32>) -> String {
        match (season, episode) {
            (Some(season), Some(episode)) => format!("torrents:v1:{imdb}:{season}:{episode}"),
            (Some(season), None) => format!("torrents:v1:{imdb}:{season}"),
            _ => format!("torrents:v1:{imdb}"),
        }
    }

    /// Small hash of per-torrent metadata (`title`, ...).
    pub fn torrent_meta(info_hash: &str) -> String {
        format!("torrent:v1:meta:{}", info_hash.to_uppercase())
    }

    /// Unique stream request HyperLogLog.
    pub fn stream_requests() -> String {
        "stream_request".to_string()
    }

    /// "Is this title currently being refreshed?" lock.
    pub fn stream_links_lock(imdb: &str, season: u32) -> String {
        format!("stream_links:{imdb}:{season}")
    }

    /// Per-indexer, per-title search lock.
    pub fn indexer_search_lock(indexer: &str, imdb: &str) -> String {
        format!("lock:indexer_search:{indexer}:{imdb}")
    }

    /// Per-GUID torrent processing lock.
    pub fn torrent_processor_lock(guid: &str) -> String {
        format!("lock:torrent_processor:{guid}")
    }

    /// Cached magnet-redirect resolution.
    pub fn magnet_resolve(guid: &str) -> String {
        format!("magnet:resolve:{guid}")
    }

    /// Cached indexer aggregator response.
    pub fn jackett_search(fingerprint: &str) -> String {
        format!("jackett:search:{fingerprint}")
    }

    /// Cached media metadata lookup.
    pub fn cinemeta(media_type: &str, id: &str) -> String {
        format!("cinemeta:{media_type}:{id}")
    }

    /// The set of cached Real-Debrid file ids seen at probe time, needed
    /// again when the playback request arrives.
    pub fn rd_instant_file_set(info_hash: &str, file_id: &str) -> String {
        format!(
            "rd:instant_file_set:torrent:{}:{}",
            info_hash.to_uppercase(),
            file_id
        )
    }

    /// Short-lived resolved playback link, keyed by a hash of the user's
    /// API token so one user's links never leak to another.
    pub fn playback_link(provider: &str, token_hash: &str, info_hash: &str, file_id: &str) -> String {
        format!(
            "stream:{provider}:{token_hash}:{}:{file_id}",
            info_hash.to_uppercase()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_torrents_key_shapes() {
        assert_eq!(Keys::torrents("tt0111161", None, None), "torrents:v1:tt0111161");
        assert_eq!(
            Keys::torrents("tt0108778", Some(5), None),
            "torrents:v1:tt0108778:5"
        );
        assert_eq!(
            Keys::torrents("tt0108778", Some(5), Some(10)),
            "torrents:v1:tt0108778:5:10"
        );
    }

    #[test]
    fn test_episode_without_season_falls_back_to_title_key() {
        assert_eq!(
            Keys::torrents("tt0108778", None, Some(10)),
            "torrents:v1:tt0108778"
        );
    }

    #[test]
    fn test_meta_key_is_upper_cased() {
        assert_eq!(
            Keys::torrent_meta("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"),
            "torrent:v1:meta:DEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF"
        );
    }

    #[test]
    fn test_lock_keys() {
        assert_eq!(
            Keys::stream_links_lock("tt0108778", 5),
            "stream_links:tt0108778:5"
        );
        assert_eq!(
            Keys::indexer_search_lock("eztv", "tt0108778"),
            "lock:indexer_search:eztv:tt0108778"
        );
    }
}
