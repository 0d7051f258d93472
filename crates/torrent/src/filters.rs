//! Exclusion filters over parsed release metadata.
//!
//! The user config stores the ids of releases to *drop*: a torrent is
//! removed from a listing when any selected filter's predicate returns true
//! for its parsed meta.

use lazy_static::lazy_static;
use regex::Regex;

use crate::meta::{Resolution, TorrentMeta};

lazy_static! {
    static ref YTS: Regex = Regex::new(r"(?i)(YTS|YIFY)").unwrap();
    static ref P480: Regex = Regex::new(r"(?i)\b480p\b").unwrap();
}

/// One exclusion filter: `apply(meta) == true` means "drop this release".
#[derive(Clone, Copy)]
pub struct Filter {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub apply: fn(&TorrentMeta) -> bool,
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter").field("id", &self.id).finish()
    }
}

pub const ALL: &[Filter] = &[
    // Resolutions
    Filter {
        id: "4k",
        name: "4K (2160p)",
        category: "Resolution",
        apply: |meta| meta.resolution == Some(Resolution::K4),
    },
    Filter {
        id: "qhd",
        name: "QHD (1440p)",
        category: "Resolution",
        apply: |meta| meta.resolution == Some(Resolution::Qhd),
    },
    Filter {
        id: "1080p",
        name: "1080p",
        category: "Resolution",
        apply: |meta| meta.resolution == Some(Resolution::P1080),
    },
    Filter {
        id: "720p",
        name: "720p",
        category: "Resolution",
        apply: |meta| meta.resolution == Some(Resolution::P720),
    },
    Filter {
        id: "480p",
        name: "480p",
        category: "Resolution",
        apply: |meta| P480.is_match(&meta.raw_title),
    },
    Filter {
        id: "unknown_resolution",
        name: "Unknown Resolution",
        category: "Resolution",
        apply: |meta| meta.resolution.is_none(),
    },
    // Video Quality
    Filter {
        id: "yts",
        name: "YTS",
        category: "Video Quality",
        apply: |meta| YTS.is_match(&meta.raw_title),
    },
    Filter {
        id: "remux",
        name: "REMUX",
        category: "Video Quality",
        apply: |meta| meta.is_remux(),
    },
    Filter {
        id: "hdr",
        name: "HDR",
        category: "Video Quality",
        apply: |meta| meta.hdr,
    },
    Filter {
        id: "x265",
        name: "H.265 (HEVC)",
        category: "Video Quality",
        apply: |meta| meta.codec == "H.265",
    },
    Filter {
        id: "x264",
        name: "H.264 (AVC)",
        category: "Video Quality",
        apply: |meta| meta.codec == "H.264",
    },
    Filter {
        id: "ten_bit",
        name: "10bit",
        category: "Video Quality",
        apply: |meta| meta.bit_depth == 10,
    },
];

pub fn by_id(id: &str) -> Option<Filter> {
    ALL.iter().copied().find(|f| f.id == id)
}

pub fn by_category(category: &str) -> Vec<Filter> {
    ALL.iter().copied().filter(|f| f.category == category).collect()
}

/// Resolve a list of filter ids from the user config; unknown ids are
/// ignored with a debug log so old configs keep working.
pub fn resolve(ids: &[String]) -> Vec<Filter> {
    ids.iter()
        .filter_map(|id| {
            let filter = by_id(id);
            if filter.is_none() {
                tracing::debug!(id = %id, "unknown filter id in user config");
            }
            filter
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::TorrentMeta;

    #[test]
    fn test_resolution_filters() {
        let meta = TorrentMeta::parse("Movie 2023 2160p x265");
        assert!((by_id("4k").unwrap().apply)(&meta));
        assert!(!(by_id("1080p").unwrap().apply)(&meta));
        assert!(!(by_id("unknown_resolution").unwrap().apply)(&meta));

        let unknown = TorrentMeta::parse("Movie 2023 DVDRip");
        assert!((by_id("unknown_resolution").unwrap().apply)(&unknown));
    }

    #[test]
    fn test_quality_filters() {
        let meta = TorrentMeta::parse("Movie 2023 1080p YTS 10bit HDR x264");
        assert!((by_id("yts").unwrap().apply)(&meta));
        assert!((by_id("ten_bit").unwrap().apply)(&meta));
        assert!((by_id("hdr").unwrap().apply)(&meta));
        assert!((by_id("x264").unwrap().apply)(&meta));
        assert!(!(by_id("x265").unwrap().apply)(&meta));
    }

    #[test]
    fn test_resolve_ignores_unknown_ids() {
        let filters = resolve(&["4k".to_string(), "bogus".to_string()]);
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].id, "4k");
    }

    #[test]
    fn test_by_category() {
        assert_eq!(by_category("Resolution").len(), 6);
        assert_eq!(by_category("Video Quality").len(), 6);
    }
}
