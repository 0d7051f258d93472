//! Release-title parsing and scoring for the Annatar addon.
//!
//! A free-form torrent title goes in, structured metadata comes out
//! ([`TorrentMeta`]), and the scoring model turns that metadata plus a search
//! query into a single bit-packed integer that both ranks results and
//! records what matched.

pub mod filters;
pub mod magnet;
pub mod meta;
pub mod score;

pub use filters::Filter;
pub use meta::{Resolution, Torrent, TorrentMeta};

use serde::{Deserialize, Serialize};

/// Content category as Stremio and the indexer aggregator see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Movie,
    Series,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Movie => "movie",
            Category::Series => "series",
        }
    }

    /// Torznab category id used by the indexer aggregator.
    pub fn jackett_id(&self) -> u32 {
        match self {
            Category::Movie => 2000,
            Category::Series => 5000,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "movie" => Some(Category::Movie),
            "series" => Some(Category::Series),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_ids() {
        assert_eq!(Category::Movie.jackett_id(), 2000);
        assert_eq!(Category::Series.jackett_id(), 5000);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse("movie"), Some(Category::Movie));
        assert_eq!(Category::parse("series"), Some(Category::Series));
        assert_eq!(Category::parse("music"), None);
    }
}
