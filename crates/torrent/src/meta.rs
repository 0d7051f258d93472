//! Release-title parser.
//!
//! [`TorrentMeta::parse`] is total: any string yields a meta, unrecognized
//! fields just stay at their defaults. Season and episode are sets so that
//! range forms (`S01-S10`, `E01-E05`) and season packs keep their full
//! extent for scoring.

use std::collections::BTreeMap;
use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref EXTENSION: Regex =
        Regex::new(r"(?i)\.(mkv|mp4|avi|m4v|mov|wmv|ts|webm|mpg|mpeg)$").unwrap();
    static ref LEADING_GROUP: Regex = Regex::new(r"^\s*\[[^\]]*\]\s*").unwrap();
    static ref SEASON_RANGE: Regex = Regex::new(r"(?i)\bS(\d{1,2})\s*-\s*S?(\d{1,2})\b").unwrap();
    static ref SEASON_EPISODE: Regex =
        Regex::new(r"(?i)\bS(\d{1,2})[\s._-]*E(\d{1,3})(?:\s*-\s*E?(\d{1,3}))?\b").unwrap();
    static ref SEASON_WORD: Regex =
        Regex::new(r"(?i)\bSeason[\s._]+(\d{1,2})(?:\s*-\s*(\d{1,2}))?\b").unwrap();
    static ref SEASON_LONE: Regex = Regex::new(r"(?i)\bS(\d{1,2})\b").unwrap();
    static ref CROSS_FORM: Regex = Regex::new(r"\b(\d{1,2})x(\d{1,3})\b").unwrap();
    static ref EPISODE_LONE: Regex =
        Regex::new(r"(?i)\bE(\d{1,3})(?:\s*-\s*E?(\d{1,3}))?\b").unwrap();
    static ref YEAR: Regex = Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap();
    static ref RESOLUTION: Regex =
        Regex::new(r"(?i)\b(4320p|2880p|2160p|1440p|1080p|720p|4k|5k|8k|uhd|qhd)\b").unwrap();
    static ref CODEC: Regex =
        Regex::new(r"(?i)\b(x[\s.]?264|h[\s.]?264|avc|x[\s.]?265|h[\s.]?265|hevc|xvid|av1)\b")
            .unwrap();
    static ref AUDIO: Regex = Regex::new(
        r"(?i)\b(TrueHD|Atmos|DDP|DD\+|EAC-?3|AC-?3|DD|DTS(?:-HD)?(?:[\s.]?MA)?|AAC|FLAC|OPUS|MP3)\b"
    )
    .unwrap();
    static ref CHANNELS: Regex = Regex::new(r"(?i)\b[a-z]*([57])[\s._]?1\b").unwrap();
    static ref QUALITY: Regex = Regex::new(
        r"(?i)\b(blu-?ray|bd-?rip|br-?rip|web-?dl|web-?rip|hd-?rip|hdtv|dvd-?rip|remux)\b"
    )
    .unwrap();
    static ref QUALITY_CAM: Regex = Regex::new(r"\b(TS|TC|CAM|TELESYNC|SCREENER)\b").unwrap();
    static ref HDR: Regex =
        Regex::new(r"(?i)\b(HDR10\+?|HDR|DV|DoVi|Dolby[\s._]?Vision)\b").unwrap();
    static ref BIT_DEPTH: Regex = Regex::new(r"(?i)\b(8|10|12)[-\s.]?bit\b").unwrap();
    static ref LANGUAGE: Regex = Regex::new(
        r"(?i)\b(MULTI|FRENCH|ITALIAN|GERMAN|SPANISH|LATINO|HINDI|KOREAN|JAPANESE|RUSSIAN|ENGLISH)\b"
    )
    .unwrap();
    static ref SUBTITLES: Regex = Regex::new(r"(?i)\b(SUBBED|MULTI[\s.-]?SUBS?|VOSTFR)\b").unwrap();
    static ref REPACK: Regex = Regex::new(r"(?i)\b(REPACK|PROPER|RERIP)\b").unwrap();
    static ref TRASH: Regex =
        Regex::new(r"(?i)\b(sample|trailer|featurette|extras?)\b").unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"[._]").unwrap();
    static ref BRACKET_GROUP: Regex = Regex::new(r"[\[(][^\])]*[\])]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Canonical video resolution tokens, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "QHD")]
    Qhd,
    #[serde(rename = "4K")]
    K4,
    #[serde(rename = "5K")]
    K5,
    #[serde(rename = "8K")]
    K8,
}

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Resolution::P720,
        Resolution::P1080,
        Resolution::Qhd,
        Resolution::K4,
        Resolution::K5,
        Resolution::K8,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P720 => "720p",
            Resolution::P1080 => "1080p",
            Resolution::Qhd => "QHD",
            Resolution::K4 => "4K",
            Resolution::K5 => "5K",
            Resolution::K8 => "8K",
        }
    }

    /// Resolution sub-score used by the bit-packed match score (1..=6).
    pub fn score(&self) -> i64 {
        match self {
            Resolution::P720 => 1,
            Resolution::P1080 => 2,
            Resolution::Qhd => 3,
            Resolution::K4 => 4,
            Resolution::K5 => 5,
            Resolution::K8 => 6,
        }
    }

    pub fn from_score(score: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.score() == score)
    }

    /// Normalize a raw token (`2160p`, `4k`, `UHD`, ...) to its canonical
    /// form. Returns `None` for tokens below 720p or unknown ones.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_lowercase().as_str() {
            "720p" => Some(Resolution::P720),
            "1080p" => Some(Resolution::P1080),
            "1440p" | "qhd" => Some(Resolution::Qhd),
            "2160p" | "4k" | "uhd" => Some(Resolution::K4),
            "2880p" | "5k" => Some(Resolution::K5),
            "4320p" | "8k" => Some(Resolution::K8),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured view of one release title.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TorrentMeta {
    pub raw_title: String,
    /// Normalized name portion of the title
    pub title: String,
    /// 0 when the title carries no year
    pub year: u32,
    pub season: Vec<u32>,
    pub episode: Vec<u32>,
    pub resolution: Option<Resolution>,
    pub codec: String,
    /// Audio codec, including channel layout when present (`DDP 5.1`)
    pub audio: String,
    /// Source quality tag (`BluRay`, `WEB-DL`, ...)
    pub quality: String,
    pub hdr: bool,
    pub bit_depth: u32,
    pub languages: Vec<String>,
    pub subtitles: Vec<String>,
    /// Recognized tags that have no dedicated field (remux, repack, group)
    pub extra: BTreeMap<String, String>,
}

/// A parsed release plus the 40-hex-char info-hash identifying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torrent {
    /// Canonical upper-case form
    pub info_hash: String,
    pub meta: TorrentMeta,
}

impl Torrent {
    pub fn new(info_hash: &str, meta: TorrentMeta) -> Self {
        Self {
            info_hash: info_hash.to_uppercase(),
            meta,
        }
    }
}

impl TorrentMeta {
    /// Parse a free-form release title. Never fails; unrecognized parts are
    /// left at their defaults.
    pub fn parse(raw: &str) -> Self {
        let stripped = EXTENSION.replace(raw, "");
        let text = stripped.as_ref();

        let mut meta = TorrentMeta {
            raw_title: raw.to_string(),
            ..Default::default()
        };
        let mut covered: Vec<Range<usize>> = Vec::new();
        let mut marker_start: Option<usize> = None;

        // Season/episode forms, most specific first
        for caps in SEASON_RANGE.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let (start, end) = (parse_num(&caps, 1), parse_num(&caps, 2));
            push_range(&mut meta.season, start, end);
            covered.push(whole.range());
            note_marker(whole.start(), &mut marker_start);
        }
        for caps in SEASON_EPISODE.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if overlaps(&covered, &whole.range()) {
                continue;
            }
            push_range(&mut meta.season, parse_num(&caps, 1), parse_num(&caps, 1));
            push_range(
                &mut meta.episode,
                parse_num(&caps, 2),
                caps.get(3)
                    .map_or_else(|| parse_num(&caps, 2), |_| parse_num(&caps, 3)),
            );
            covered.push(whole.range());
            note_marker(whole.start(), &mut marker_start);
        }
        for caps in SEASON_WORD.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if overlaps(&covered, &whole.range()) {
                continue;
            }
            let start = parse_num(&caps, 1);
            let end = caps.get(2).map_or(start, |_| parse_num(&caps, 2));
            push_range(&mut meta.season, start, end);
            covered.push(whole.range());
            note_marker(whole.start(), &mut marker_start);
        }
        for caps in CROSS_FORM.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if overlaps(&covered, &whole.range()) {
                continue;
            }
            push_range(&mut meta.season, parse_num(&caps, 1), parse_num(&caps, 1));
            push_range(&mut meta.episode, parse_num(&caps, 2), parse_num(&caps, 2));
            covered.push(whole.range());
            note_marker(whole.start(), &mut marker_start);
        }
        for caps in SEASON_LONE.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if overlaps(&covered, &whole.range()) {
                continue;
            }
            push_range(&mut meta.season, parse_num(&caps, 1), parse_num(&caps, 1));
            covered.push(whole.range());
            note_marker(whole.start(), &mut marker_start);
        }
        for caps in EPISODE_LONE.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if overlaps(&covered, &whole.range()) {
                continue;
            }
            push_range(
                &mut meta.episode,
                parse_num(&caps, 1),
                caps.get(2)
                    .map_or_else(|| parse_num(&caps, 1), |_| parse_num(&caps, 2)),
            );
            covered.push(whole.range());
            note_marker(whole.start(), &mut marker_start);
        }

        meta.season.sort_unstable();
        meta.season.dedup();
        meta.episode.sort_unstable();
        meta.episode.dedup();

        for caps in YEAR.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if overlaps(&covered, &whole.range()) {
                continue;
            }
            meta.year = parse_num(&caps, 1);
            note_marker(whole.start(), &mut marker_start);
            break;
        }

        if let Some(m) = RESOLUTION.find(text) {
            meta.resolution = Resolution::from_token(m.as_str());
            note_marker(m.start(), &mut marker_start);
        }

        if let Some(caps) = CODEC.captures(text) {
            let whole = caps.get(0).unwrap();
            meta.codec = normalize_codec(whole.as_str());
            note_marker(whole.start(), &mut marker_start);
        }

        let channels = CHANNELS.captures(text).map(|caps| {
            note_marker(caps.get(0).unwrap().start(), &mut marker_start);
            format!("{}.1", &caps[1])
        });
        if let Some(caps) = AUDIO.captures(text) {
            let whole = caps.get(0).unwrap();
            meta.audio = normalize_audio(whole.as_str());
            note_marker(whole.start(), &mut marker_start);
        }
        if let Some(channels) = channels {
            if meta.audio.is_empty() {
                meta.audio = channels;
            } else {
                meta.audio = format!("{} {}", meta.audio, channels);
            }
        }

        if let Some(caps) = QUALITY.captures(text) {
            let whole = caps.get(0).unwrap();
            let normalized = normalize_quality(whole.as_str());
            if normalized == "REMUX" {
                meta.extra.insert("remux".to_string(), "1".to_string());
            } else {
                meta.quality = normalized;
            }
            note_marker(whole.start(), &mut marker_start);
        }
        if meta.quality.is_empty() {
            if let Some(m) = QUALITY_CAM.find(text) {
                meta.quality = m.as_str().to_string();
                note_marker(m.start(), &mut marker_start);
            }
        }
        // REMUX can ride along with a source tag ("BluRay REMUX")
        if !meta.extra.contains_key("remux") {
            let lowered = text.to_lowercase();
            if lowered.contains("remux") {
                meta.extra.insert("remux".to_string(), "1".to_string());
            }
        }

        if let Some(m) = HDR.find(text) {
            meta.hdr = true;
            note_marker(m.start(), &mut marker_start);
        }
        if let Some(caps) = BIT_DEPTH.captures(text) {
            let whole = caps.get(0).unwrap();
            meta.bit_depth = parse_num(&caps, 1);
            note_marker(whole.start(), &mut marker_start);
        }
        for caps in LANGUAGE.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            note_marker(whole.start(), &mut marker_start);
            let lang = capitalize(whole.as_str());
            if !meta.languages.contains(&lang) {
                meta.languages.push(lang);
            }
        }
        for caps in SUBTITLES.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            note_marker(whole.start(), &mut marker_start);
            let subs = capitalize(whole.as_str());
            if !meta.subtitles.contains(&subs) {
                meta.subtitles.push(subs);
            }
        }
        if REPACK.is_match(text) {
            meta.extra.insert("repack".to_string(), "1".to_string());
        }

        meta.title = extract_title(text, marker_start);
        meta
    }

    /// `5.1`, `7.1` or empty, derived from the audio tag.
    pub fn audio_channels(&self) -> &'static str {
        if self.audio.contains("7.1") {
            "7.1"
        } else if self.audio.contains("5.1") {
            "5.1"
        } else {
            ""
        }
    }

    /// Samples, trailers and other non-content files.
    pub fn is_trash(&self) -> bool {
        TRASH.is_match(&self.raw_title)
    }

    pub fn is_remux(&self) -> bool {
        self.extra.contains_key("remux")
    }

    /// Whether this release contains the requested season and episode.
    pub fn is_season_episode(&self, season: u32, episode: u32) -> bool {
        self.score_series(season, episode) > 0
    }

    pub fn with_info_hash(self, info_hash: &str) -> Torrent {
        Torrent::new(info_hash, self)
    }
}

fn note_marker(start: usize, marker_start: &mut Option<usize>) {
    if marker_start.map_or(true, |current| start < current) {
        *marker_start = Some(start);
    }
}

fn parse_num<T: std::str::FromStr + Default>(caps: &regex::Captures<'_>, group: usize) -> T {
    caps.get(group)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or_default()
}

fn push_range(target: &mut Vec<u32>, start: u32, end: u32) {
    if start == 0 {
        return;
    }
    if end >= start && end - start <= 50 {
        target.extend(start..=end);
    } else {
        target.push(start);
    }
}

fn overlaps(covered: &[Range<usize>], candidate: &Range<usize>) -> bool {
    covered
        .iter()
        .any(|range| candidate.start < range.end && range.start < candidate.end)
}

fn normalize_codec(token: &str) -> String {
    let lowered: String = token
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    match lowered.as_str() {
        "x264" | "h264" | "avc" => "H.264".to_string(),
        "x265" | "h265" | "hevc" => "H.265".to_string(),
        "xvid" => "XviD".to_string(),
        "av1" => "AV1".to_string(),
        other => other.to_uppercase(),
    }
}

fn normalize_audio(token: &str) -> String {
    let lowered: String = token
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    match lowered.as_str() {
        "ddp" | "dd" | "eac3" => "DDP".to_string(),
        "ac3" => "DD".to_string(),
        "truehd" => "TrueHD".to_string(),
        "atmos" => "Atmos".to_string(),
        "dtshdma" | "dtshd" => "DTS-HD MA".to_string(),
        other => other.to_uppercase(),
    }
}

fn normalize_quality(token: &str) -> String {
    let lowered: String = token
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    match lowered.as_str() {
        "bluray" => "BluRay".to_string(),
        "bdrip" => "BDRip".to_string(),
        "brrip" => "BRRip".to_string(),
        "webdl" => "WEB-DL".to_string(),
        "webrip" => "WEBRip".to_string(),
        "hdrip" => "HDRip".to_string(),
        "hdtv" => "HDTV".to_string(),
        "dvdrip" => "DVDRip".to_string(),
        "remux" => "REMUX".to_string(),
        other => other.to_uppercase(),
    }
}

fn capitalize(token: &str) -> String {
    let lowered = token.to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => lowered,
    }
}

fn extract_title(text: &str, marker_start: Option<usize>) -> String {
    let prefix = match marker_start {
        Some(0) => LEADING_GROUP.replace(text, "").to_string(),
        Some(at) => text[..at].to_string(),
        None => text.to_string(),
    };
    let no_groups = BRACKET_GROUP.replace_all(&prefix, " ");
    let spaced = SEPARATORS.replace_all(&no_groups, " ");
    let collapsed = WHITESPACE.replace_all(spaced.trim(), " ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || c == '-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_simple_episode() {
        let meta = TorrentMeta::parse("Friends.S05E10.1080p.WEB-DL.x264.mkv");
        assert_eq!(meta.title, "Friends");
        assert_eq!(meta.season, vec![5]);
        assert_eq!(meta.episode, vec![10]);
        assert_eq!(meta.resolution, Some(Resolution::P1080));
        assert_eq!(meta.quality, "WEB-DL");
        assert_eq!(meta.codec, "H.264");
    }

    #[test]
    fn test_parses_season_range() {
        let meta = TorrentMeta::parse("Friends S01-S10 COMPLETE 4k");
        assert_eq!(meta.title, "Friends");
        assert_eq!(meta.season, (1..=10).collect::<Vec<_>>());
        assert!(meta.episode.is_empty());
        assert_eq!(meta.resolution, Some(Resolution::K4));
    }

    #[test]
    fn test_parses_season_word_range() {
        let meta = TorrentMeta::parse("Friends Season 1-10 COMPLETE");
        assert_eq!(meta.season, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_parses_short_range() {
        let meta = TorrentMeta::parse("Friends S01-S3");
        assert_eq!(meta.season, vec![1, 2, 3]);
    }

    #[test]
    fn test_parses_dashed_episode() {
        let meta = TorrentMeta::parse("Friends S04-E10");
        assert_eq!(meta.season, vec![4]);
        assert_eq!(meta.episode, vec![10]);
    }

    #[test]
    fn test_parses_episode_range() {
        let meta = TorrentMeta::parse("Fargo S01 E01-E05 2020 1080p HULU WEB-DL DDP5 1 H 264");
        assert_eq!(meta.season, vec![1]);
        assert_eq!(meta.episode, vec![1, 2, 3, 4, 5]);
        assert_eq!(meta.year, 2020);
        assert_eq!(meta.audio_channels(), "5.1");
        assert_eq!(meta.codec, "H.264");
    }

    #[test]
    fn test_parses_cross_form() {
        let meta = TorrentMeta::parse("The Walking Dead 4x01 720p HDTV");
        assert_eq!(meta.season, vec![4]);
        assert_eq!(meta.episode, vec![1]);
        assert_eq!(meta.resolution, Some(Resolution::P720));
    }

    #[test]
    fn test_season_pack_keeps_episode_empty() {
        let meta = TorrentMeta::parse("Fargo S01 2020 1080p HULU WEB-DL DDP5 1 H 264");
        assert_eq!(meta.season, vec![1]);
        assert!(meta.episode.is_empty());
    }

    #[test]
    fn test_resolution_normalization() {
        for (raw, expected) in [
            ("Show S01 720p", Resolution::P720),
            ("Show S01 1080p", Resolution::P1080),
            ("Show S01 1440p", Resolution::Qhd),
            ("Show S01 2160p", Resolution::K4),
            ("Show S01 4K", Resolution::K4),
            ("Show S01 UHD", Resolution::K4),
            ("Show S01 2880p", Resolution::K5),
            ("Show S01 4320p", Resolution::K8),
            ("Show S01 8K", Resolution::K8),
        ] {
            assert_eq!(TorrentMeta::parse(raw).resolution, Some(expected), "{raw}");
        }
        assert_eq!(TorrentMeta::parse("Show S01 480p").resolution, None);
    }

    #[test]
    fn test_audio_channels() {
        assert_eq!(
            TorrentMeta::parse("Movie 2023 DDP5.1 1080p").audio_channels(),
            "5.1"
        );
        assert_eq!(
            TorrentMeta::parse("Movie 2023 TrueHD 7.1 2160p").audio_channels(),
            "7.1"
        );
        assert_eq!(TorrentMeta::parse("Movie 2023 AAC").audio_channels(), "");
    }

    #[test]
    fn test_hdr_and_bit_depth() {
        let meta = TorrentMeta::parse("Movie 2023 2160p HDR10 10bit x265");
        assert!(meta.hdr);
        assert_eq!(meta.bit_depth, 10);
        assert_eq!(meta.codec, "H.265");
        assert!(!TorrentMeta::parse("Movie 2023 DVDRip").hdr);
    }

    #[test]
    fn test_remux_flag() {
        assert!(TorrentMeta::parse("Movie 2023 BluRay REMUX 2160p").is_remux());
        assert!(!TorrentMeta::parse("Movie 2023 BluRay 2160p").is_remux());
    }

    #[test]
    fn test_trash_detection() {
        assert!(TorrentMeta::parse("Movie.2023.Sample.mkv").is_trash());
        assert!(TorrentMeta::parse("Movie Trailer 1080p").is_trash());
        assert!(!TorrentMeta::parse("Movie 2023 1080p").is_trash());
    }

    #[test]
    fn test_title_with_dots() {
        let meta = TorrentMeta::parse("The.Series.Name.S01E04.WEBRip.x264-GROUP");
        assert_eq!(meta.title, "The Series Name");
    }

    #[test]
    fn test_movie_title_with_year() {
        let meta =
            TorrentMeta::parse("The Lord of the Rings The Return of the King 2003 1080p X265");
        assert_eq!(meta.title, "The Lord of the Rings The Return of the King");
        assert_eq!(meta.year, 2003);
        assert_eq!(meta.codec, "H.265");
        assert!(meta.season.is_empty());
    }

    #[test]
    fn test_garbage_is_total() {
        let meta = TorrentMeta::parse("%%% ??? !!!");
        assert!(meta.season.is_empty());
        assert!(meta.episode.is_empty());
        assert_eq!(meta.year, 0);
        assert_eq!(meta.resolution, None);
    }

    #[test]
    fn test_info_hash_canonical_upper() {
        let torrent = TorrentMeta::parse("Movie 2023 1080p")
            .with_info_hash("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef");
        assert_eq!(torrent.info_hash, "DEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF");
    }
}
