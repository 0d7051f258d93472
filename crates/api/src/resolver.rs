//! The stream resolver.
//!
//! On every request: record analytics, kick the background search pipeline,
//! read the corpus, optionally wait briefly for fresh torrents on a cold
//! title, then walk the debrid generator under per-resolution quotas and
//! shape the survivors into Stremio stream records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use db::events::{SearchRequest, TorrentAdded};
use db::{odm, CacheTtl, Db, Keys};
use debrid::{DebridService, StreamLink};
use lazy_static::lazy_static;
use media::CinemetaClient;
use prometheus::{HistogramVec, IntCounter, Registry};
use shared::error::AppResult;
use shared::human::{arrange_into_rows, format_bytes, rank_quality};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use torrent::filters::Filter;
use torrent::{Category, TorrentMeta};
use tracing::{debug, error, info};

use crate::stremio::{Stream, StreamResponse};

/// How many corpus entries are handed to the debrid layer per request.
const TORRENT_CANDIDATE_LIMIT: usize = 100;

lazy_static! {
    static ref UNIQUE_SEARCHES: IntCounter = IntCounter::new(
        "unique_searches_total",
        "Unique stream search counter"
    )
    .unwrap();
    static ref REQUEST_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "resolver_request_duration_seconds",
            "Duration of resolver requests in seconds"
        ),
        &["type", "debrid_service"]
    )
    .unwrap();
}

/// Register this module's metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> anyhow::Result<()> {
    registry.register(Box::new(UNIQUE_SEARCHES.clone()))?;
    registry.register(Box::new(REQUEST_DURATION.clone()))?;
    Ok(())
}

/// One resolver invocation. Season/episode are 0 for movies.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub category: Category,
    pub imdb: String,
    pub season: u32,
    pub episode: u32,
    pub max_results: usize,
    pub filters: Vec<Filter>,
}

impl ResolveRequest {
    fn season_query(&self) -> (Option<u32>, Option<u32>) {
        match self.category {
            Category::Movie => (None, None),
            Category::Series => (Some(self.season), Some(self.episode)),
        }
    }
}

/// Resolve a stream request into playable links. Failures never escape as
/// HTTP errors; they surface as `{streams: [], error}` so the client shows
/// the text.
pub async fn search(
    db: &Db,
    cinemeta: &CinemetaClient,
    provider: Arc<dyn DebridService>,
    search_timeout: Duration,
    request: &ResolveRequest,
) -> StreamResponse {
    let timer = REQUEST_DURATION
        .with_label_values(&[request.category.as_str(), provider.id()])
        .start_timer();
    let response = match search_inner(db, cinemeta, provider, search_timeout, request).await {
        Ok(response) => response,
        Err(err) => {
            error!(imdb = %request.imdb, error = %err, "error searching");
            StreamResponse::error("Error searching")
        }
    };
    timer.observe_duration();
    response
}

async fn search_inner(
    db: &Db,
    cinemeta: &CinemetaClient,
    provider: Arc<dyn DebridService>,
    search_timeout: Duration,
    request: &ResolveRequest,
) -> AppResult<StreamResponse> {
    let unique_key = format!("{}:{}:{}", request.imdb, request.season, request.episode);
    if db
        .unique_add(&Keys::stream_requests(), &unique_key)
        .await
        .unwrap_or(false)
    {
        UNIQUE_SEARCHES.inc();
    }

    if cinemeta
        .media_info(request.category, &request.imdb)
        .await?
        .is_none()
    {
        error!(imdb = %request.imdb, "error getting media info");
        return Ok(StreamResponse::error("Error getting media info"));
    }

    let (season, episode) = request.season_query();
    SearchRequest {
        imdb: request.imdb.clone(),
        category: request.category,
        season,
        episode,
    }
    .publish(db)
    .await?;

    let mut torrents = odm::list_torrents(
        db,
        &request.imdb,
        season,
        episode,
        &request.filters,
        TORRENT_CANDIDATE_LIMIT,
    )
    .await?;

    if torrents.is_empty() {
        // No corpus yet. If nobody else is refreshing this title, wait a
        // bounded moment for the pipeline to fill it, then read again. The
        // events only wake us; results always come from the store.
        let lock_key = Keys::stream_links_lock(&request.imdb, request.season);
        if db.try_lock(&lock_key, CacheTtl::HOUR).await.unwrap_or(false) {
            let needed = (request.max_results / 3).max(1);
            wait_for_torrents(db, request, needed, search_timeout).await;
            torrents = odm::list_torrents(
                db,
                &request.imdb,
                season,
                episode,
                &request.filters,
                TORRENT_CANDIDATE_LIMIT,
            )
            .await?;
        }
    }
    info!(imdb = %request.imdb, count = torrents.len(), "found torrents");

    let mut links = collect_links(
        provider.as_ref(),
        torrents,
        request.season,
        request.episode,
        request.max_results,
    )
    .await;
    debug!(links = links.len(), "found stream links");

    links.sort_by(|a, b| {
        (rank_quality(&b.name), b.size).cmp(&(rank_quality(&a.name), a.size))
    });

    let streams = links
        .iter()
        .map(|link| build_stream(link, provider.short_name()))
        .collect();
    Ok(StreamResponse {
        streams,
        error: None,
    })
}

/// Block until `needed` relevant torrents were announced or the timeout
/// fires, whichever comes first.
async fn wait_for_torrents(db: &Db, request: &ResolveRequest, needed: usize, timeout: Duration) {
    let (tx, mut rx) = mpsc::channel::<TorrentAdded>(16);
    let cancel = CancellationToken::new();
    let listener_db = db.clone();
    let listener_cancel = cancel.clone();
    let listener = tokio::spawn(async move {
        TorrentAdded::listen(&listener_db, tx, "stream_resolver", listener_cancel).await;
    });

    let (season, episode) = request.season_query();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut arrived = 0usize;
    while arrived < needed {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) => {
                if event_matches(&event, &request.imdb, season, episode) {
                    arrived += 1;
                }
            }
            Ok(None) => break,
            Err(_) => {
                debug!(imdb = %request.imdb, arrived, "search wait timed out");
                break;
            }
        }
    }
    cancel.cancel();
    let _ = listener.await;
}

fn event_matches(
    event: &TorrentAdded,
    imdb: &str,
    season: Option<u32>,
    episode: Option<u32>,
) -> bool {
    if event.imdb != imdb {
        return false;
    }
    if let Some(season) = season {
        if event.season != Some(season) {
            return false;
        }
        // a season pack satisfies any episode of that season
        return event.episode.is_none() || event.episode == episode;
    }
    true
}

/// Drain the provider generator under per-resolution quotas.
///
/// Each resolution bucket holds at most `ceil(max_results / 3)` links;
/// overflow is skipped without counting. Once `max_results` links are
/// accepted in total the stop signal fires and the generator stops probing.
pub async fn collect_links(
    provider: &dyn DebridService,
    torrents: Vec<String>,
    season: u32,
    episode: u32,
    max_results: usize,
) -> Vec<StreamLink> {
    if torrents.is_empty() || max_results == 0 {
        return Vec::new();
    }
    let stop = CancellationToken::new();
    let mut incoming = provider.get_stream_links(torrents, season, episode, max_results, stop.clone());

    let per_resolution = max_results.div_ceil(3);
    let mut buckets: HashMap<&'static str, Vec<StreamLink>> = HashMap::new();
    let mut total = 0usize;

    while let Some(link) = incoming.recv().await {
        let resolution = TorrentMeta::parse(&link.name)
            .resolution
            .map_or("unknown", |r| r.as_str());
        let bucket = buckets.entry(resolution).or_default();
        if bucket.len() >= per_resolution {
            debug!(resolution = %resolution, "per-resolution quota reached");
            continue;
        }
        bucket.push(link);
        total += 1;
        if total >= max_results {
            stop.cancel();
            break;
        }
    }

    buckets.into_values().flatten().collect()
}

/// Shape one link into the Stremio stream record.
pub fn build_stream(link: &StreamLink, provider_short: &str) -> Stream {
    let meta = TorrentMeta::parse(&link.name);

    let mut parts: Vec<String> = Vec::new();
    if let Some(resolution) = meta.resolution {
        parts.push(format!("\u{1F4FA}{resolution}"));
    }
    if meta.bit_depth > 0 {
        parts.push(format!("{}bit", meta.bit_depth));
    }
    if meta.hdr {
        parts.push("HDR".to_string());
    }
    if !meta.audio_channels().is_empty() {
        parts.push(format!("\u{1F50A}{}", meta.audio_channels()));
    }
    if !meta.codec.is_empty() {
        parts.push(meta.codec.clone());
    }
    parts.push(format!("\u{1F4BE}{}", format_bytes(link.size)));

    let mut name = format!("[{provider_short}+] Annatar {provider_short}");
    if let Some(resolution) = meta.resolution {
        name.push_str(&format!(" {resolution}"));
    }
    if !meta.audio_channels().is_empty() {
        name.push_str(&format!(" {}", meta.audio_channels()));
    }

    Stream {
        url: link.url.trim().to_string(),
        title: format!("{}\n{}", link.name.trim(), arrange_into_rows(&parts, 3)),
        name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Mock provider yielding a fixed list of links, honoring the stop
    /// signal between yields the way real providers do between probes.
    struct FixedProvider {
        links: Vec<StreamLink>,
    }

    #[async_trait]
    impl DebridService for FixedProvider {
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
            _torrents: Vec<String>,
            _season: u32,
            _episode: u32,
            _max_results: usize,
            stop: CancellationToken,
        ) -> mpsc::Receiver<StreamLink> {
            let (tx, rx) = mpsc::channel(1);
            let links = self.links.clone();
            tokio::spawn(async move {
                for link in links {
                    if stop.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        sent = tx.send(link) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
            rx
        }

        async fn get_stream_for_torrent(
            &self,
            _info_hash: &str,
            _file_id: &str,
        ) -> Option<StreamLink> {
            None
        }
    }

    fn link(name: &str, size: u64) -> StreamLink {
        StreamLink {
            url: format!("/rd/key/hash/{name}"),
            name: name.to_string(),
            size,
        }
    }

    const GB: u64 = 1024 * 1024 * 1024;

    #[tokio::test]
    async fn test_per_resolution_quota() {
        // max_results=6 -> cap of 2 per resolution
        let provider = FixedProvider {
            links: vec![
                link("Movie.A.2160p.mkv", 10 * GB),
                link("Movie.B.2160p.mkv", 11 * GB),
                link("Movie.C.2160p.mkv", 12 * GB),
                link("Movie.D.2160p.mkv", 13 * GB),
                link("Movie.E.2160p.mkv", 14 * GB),
                link("Movie.F.2160p.mkv", 15 * GB),
                link("Movie.G.1080p.mkv", 4 * GB),
                link("Movie.H.1080p.mkv", 5 * GB),
                link("Movie.I.720p.mkv", 2 * GB),
                link("Movie.J.720p.mkv", 2 * GB),
            ],
        };
        let torrents = vec!["A".repeat(40)];
        let links = collect_links(&provider, torrents, 0, 0, 6).await;

        let count = |token: &str| links.iter().filter(|l| l.name.contains(token)).count();
        assert_eq!(count("2160p"), 2);
        assert_eq!(count("1080p"), 2);
        assert_eq!(count("720p"), 2);
        assert_eq!(links.len(), 6);
    }

    #[tokio::test]
    async fn test_stop_after_max_results() {
        let provider = FixedProvider {
            links: (0..20)
                .map(|i| link(&format!("Movie.{i:02}.1080p.mkv"), GB))
                .collect(),
        };
        let torrents = vec!["A".repeat(40)];
        // cap = ceil(3/3) = 1 per bucket, so one 1080p link total
        let links = collect_links(&provider, torrents, 0, 0, 3).await;
        assert_eq!(links.iter().filter(|l| l.name.contains("1080p")).count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_generator_yields_at_most_one_more_link() {
        let provider = FixedProvider {
            links: (0..50)
                .map(|i| link(&format!("Movie.{i:02}.1080p.mkv"), GB))
                .collect(),
        };
        let stop = CancellationToken::new();
        let mut rx = provider.get_stream_links(vec!["A".repeat(40)], 0, 0, 50, stop.clone());

        let first = rx.recv().await;
        assert!(first.is_some());
        stop.cancel();

        // the producer may have had one link in flight, never more
        let mut after_cancel = 0;
        while rx.recv().await.is_some() {
            after_cancel += 1;
        }
        assert!(after_cancel <= 1, "got {after_cancel} links after cancel");
    }

    #[tokio::test]
    async fn test_empty_torrent_list_short_circuits() {
        let provider = FixedProvider { links: vec![] };
        let links = collect_links(&provider, vec![], 5, 10, 5).await;
        assert!(links.is_empty());
    }

    #[test]
    fn test_build_stream_name_and_title() {
        let stream = build_stream(
            &link("Friends.S05E10.1080p.DDP5.1.x265.mkv", 5 * GB),
            "RD",
        );
        assert!(stream.name.starts_with("[RD+] Annatar RD"));
        assert!(stream.name.contains("1080p"));
        assert!(stream.name.contains("5.1"));
        assert!(stream.title.starts_with("Friends.S05E10.1080p.DDP5.1.x265.mkv\n"));
        assert!(stream.title.contains("\u{1F4FA}1080p"));
        assert!(stream.title.contains("\u{1F4BE}5.00GB"));
        assert!(stream.title.contains("H.265"));
    }

    #[test]
    fn test_event_matches_season_pack() {
        let event = TorrentAdded {
            info_hash: "A".repeat(40),
            title: "Friends S05 1080p".to_string(),
            imdb: "tt0108778".to_string(),
            size: 0,
            indexer: "eztv".to_string(),
            category: Category::Series,
            season: Some(5),
            episode: None,
        };
        assert!(event_matches(&event, "tt0108778", Some(5), Some(10)));
        assert!(!event_matches(&event, "tt0108778", Some(4), Some(10)));
        assert!(!event_matches(&event, "tt0000001", Some(5), Some(10)));

        let episodic = TorrentAdded {
            episode: Some(10),
            ..event.clone()
        };
        assert!(event_matches(&episodic, "tt0108778", Some(5), Some(10)));
        let wrong_episode = TorrentAdded {
            episode: Some(9),
            ..event
        };
        assert!(!event_matches(&wrong_episode, "tt0108778", Some(5), Some(10)));
    }

    #[test]
    fn test_final_ordering_by_quality_then_size() {
        let mut links = vec![
            link("Movie.A.720p.mkv", 10 * GB),
            link("Movie.B.2160p.mkv", GB),
            link("Movie.C.1080p.mkv", 8 * GB),
            link("Movie.D.1080p.mkv", 2 * GB),
        ];
        links.sort_by(|a, b| (rank_quality(&b.name), b.size).cmp(&(rank_quality(&a.name), a.size)));
        let names: Vec<&str> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Movie.B.2160p.mkv",
                "Movie.C.1080p.mkv",
                "Movie.D.1080p.mkv",
                "Movie.A.720p.mkv"
            ]
        );
    }
}
