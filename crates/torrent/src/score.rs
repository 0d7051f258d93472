//! Bit-packed match scoring.
//!
//! A single integer both ranks a release against a query and records what
//! matched. Sorting by the integer is equivalent to a lexicographic sort by
//! (series match, resolution, audio, year match), and the resolution bits
//! can be projected back out without re-parsing the title.
//!
//! Bit space per field:
//!   1 bit:  2 values  (boolean flags like year match)
//!   2 bits: 4 values
//!   3 bits: 8 values

use crate::meta::{Resolution, TorrentMeta};

pub const SEASON_MATCH_BIT_POS: u32 = 20;
pub const RESOLUTION_BIT_POS: u32 = 14;
pub const AUDIO_BIT_POS: u32 = 8;
pub const YEAR_MATCH_BIT_POS: u32 = 6;

const RESOLUTION_BITS_LENGTH: u32 = 3;

/// Score returned when the parsed title does not match the query name.
pub const NAME_MISMATCH: i64 = -1000;

/// Project the resolution sub-score back out of a packed match score.
pub fn get_resolution(score: i64) -> Option<Resolution> {
    let mask = ((1 << RESOLUTION_BITS_LENGTH) - 1) << RESOLUTION_BIT_POS;
    Resolution::from_score((score & mask) >> RESOLUTION_BIT_POS)
}

/// The inclusive range of packed scores a release at `resolution` can have.
/// Lets list-by-resolution be answered with a range query on the score.
pub fn score_range_for(resolution: Resolution) -> std::ops::RangeInclusive<i64> {
    let lowest = resolution.score() << RESOLUTION_BIT_POS;
    let highest = (3 << SEASON_MATCH_BIT_POS)
        | (resolution.score() << RESOLUTION_BIT_POS)
        | (2 << AUDIO_BIT_POS)
        | (1 << YEAR_MATCH_BIT_POS);
    lowest..=highest
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Anchored, case-insensitive pattern from a parsed title where each run of
/// non-word characters is a flexible gap.
fn name_pattern(title: &str) -> String {
    let mut pattern = String::from("(?i)^");
    let mut last_was_gap = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            pattern.push(c);
            last_was_gap = false;
        } else if !last_was_gap {
            pattern.push_str(".+");
            last_was_gap = true;
        }
    }
    pattern.push('$');
    pattern
}

impl TorrentMeta {
    /// Whether the parsed title is the queried name: case-insensitive,
    /// anchored at both ends, with runs of non-word characters treated as
    /// flexible separators. `Friends` does not match `Best Friends`;
    /// `Fr!eNds` does match `Friends`.
    pub fn matches_name(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        if wanted.is_empty() || self.title.is_empty() {
            return false;
        }
        if normalize_name(&self.title) == wanted {
            return true;
        }
        regex::Regex::new(&name_pattern(&self.title))
            .map(|re| re.is_match(name))
            .unwrap_or(false)
    }

    /// Score this release against a requested season/episode:
    ///    3 -> whole series matches
    ///    2 -> whole season matches
    ///    1 -> single episode matches
    ///    0 -> neither side names a season or episode
    ///  -10 -> episode mismatch
    /// -100 -> season mismatch
    ///   -1 -> unknown mismatch
    pub fn score_series(&self, season: u32, episode: u32) -> i64 {
        if season == 0 && episode == 0 {
            // no season or episode requested, probably a movie
            return 0;
        }
        if !self.season.is_empty() && !self.season.contains(&season) {
            return -100;
        }
        if !self.episode.is_empty() && !self.episode.contains(&episode) {
            return -10;
        }
        if self.season.is_empty() && self.episode.is_empty() {
            return 0;
        }
        if self.season.len() > 1 && self.season.contains(&season) {
            return 3;
        }
        if self.season.contains(&season) && self.episode.is_empty() {
            return 2;
        }
        if self.season.contains(&season) && self.episode.contains(&episode) {
            return 1;
        }
        -1
    }

    /// Pack the full match decision into a single integer. Season/episode of
    /// 0 mean "not applicable".
    pub fn match_score(&self, name: &str, year: u32, season: u32, episode: u32) -> i64 {
        if !self.matches_name(name) {
            return NAME_MISMATCH;
        }

        let series_score = self.score_series(season, episode) << SEASON_MATCH_BIT_POS;
        if series_score < 0 {
            return series_score;
        }
        let resolution_score =
            self.resolution.map_or(0, |r| r.score()) << RESOLUTION_BIT_POS;
        let audio_score = (match self.audio_channels() {
            "7.1" => 2,
            "5.1" => 1,
            _ => 0,
        }) << AUDIO_BIT_POS;
        let year_score = i64::from(self.year != 0 && self.year == year) << YEAR_MATCH_BIT_POS;

        series_score | resolution_score | audio_score | year_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(title: &str, name: &str, year: u32, season: u32, episode: u32) -> i64 {
        TorrentMeta::parse(title).match_score(name, year, season, episode)
    }

    #[test]
    fn test_sorting_series_by_score() {
        let titles = [
            "Friends S01-S10 COMPLETE 4k",
            "Friends S01-S10 COMPLETE 1080p",
            "Friends S01-S10 1080p",
            "Friends S01-S10 COMPLETE",
            "Friends Season 1-10 COMPLETE",
            "Friends S05 COMPLETE 2160p",
            "Friends S5",
            "Friends S05E10 1080p",
            "Best Friends S01-E01 2160p",
            "The Office S01-S10 1080p",
            "The Office S5E10",
            "Friends S01-S3",
            "Friends S3",
        ];

        let mut sorted = titles.to_vec();
        sorted.sort_by(|a, b| {
            score(b, "Friends", 1994, 5, 10).cmp(&score(a, "Friends", 1994, 5, 10))
        });

        assert_eq!(sorted, titles);
    }

    #[test]
    fn test_score_series_ladder() {
        let series = |title: &str| TorrentMeta::parse(title).score_series(5, 10);
        assert_eq!(series("Friends S01-S10"), 3);
        assert_eq!(series("Friends S05"), 2);
        assert_eq!(series("Friends S05-E10"), 1);
        assert_eq!(series("Friends S04-E10"), -100);
        assert_eq!(series("Friends S05E09"), -10);
        assert_eq!(series("Friends"), 0);
        assert_eq!(TorrentMeta::parse("Oppenheimer 2160p").score_series(0, 0), 0);
    }

    #[test]
    fn test_score_series_domain() {
        let allowed = [-100, -10, -1, 0, 1, 2, 3];
        for title in [
            "Friends S01-S10",
            "Friends S05",
            "Friends S05E10",
            "Friends S03",
            "Friends E10",
            "Friends",
        ] {
            for (season, episode) in [(0, 0), (5, 10), (3, 1), (1, 0)] {
                let result = TorrentMeta::parse(title).score_series(season, episode);
                assert!(allowed.contains(&result), "{title} {season}x{episode} -> {result}");
            }
        }
    }

    #[test]
    fn test_name_mismatch_is_large_negative() {
        assert!(score("Best Friends S05E10 1080p", "Friends", 0, 5, 10) <= NAME_MISMATCH);
        assert!(score("The Office S5E10", "Friends", 0, 5, 10) <= NAME_MISMATCH);
    }

    #[test]
    fn test_matches_name_flexible_separators() {
        assert!(TorrentMeta::parse("The.Office.S05E10").matches_name("The Office"));
        assert!(TorrentMeta::parse("Fr!eNds S05E10").matches_name("Friends"));
        assert!(!TorrentMeta::parse("Best Friends S05E10").matches_name("Friends"));
        assert!(!TorrentMeta::parse("Friends and Family").matches_name("Friends"));
    }

    #[test]
    fn test_resolution_monotonic() {
        let resolutions = ["720p", "1080p", "1440p", "2160p", "2880p", "4320p"];
        let scores: Vec<i64> = resolutions
            .iter()
            .map(|r| score(&format!("Friends S05E10 {r}"), "Friends", 0, 5, 10))
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] < pair[1], "scores not monotonic: {scores:?}");
        }
    }

    #[test]
    fn test_resolution_round_trip() {
        for title in [
            "Friends S05E10 720p",
            "Friends S05E10 1080p",
            "Friends S05E10 2160p",
            "Friends S05E10 8K",
            "Friends S05E10",
        ] {
            let meta = TorrentMeta::parse(title);
            let packed = meta.match_score("Friends", 0, 5, 10);
            assert_eq!(get_resolution(packed), meta.resolution, "{title}");
        }
    }

    #[test]
    fn test_year_match_bit() {
        let with_year = score("Friends 1994 S05E10 1080p", "Friends", 1994, 5, 10);
        let wrong_year = score("Friends 1994 S05E10 1080p", "Friends", 2001, 5, 10);
        assert_eq!(with_year - wrong_year, 1 << YEAR_MATCH_BIT_POS);
    }

    #[test]
    fn test_audio_bits() {
        let seven = score("Friends S05E10 1080p 7.1", "Friends", 0, 5, 10);
        let five = score("Friends S05E10 1080p 5.1", "Friends", 0, 5, 10);
        let none = score("Friends S05E10 1080p", "Friends", 0, 5, 10);
        assert_eq!(seven - none, 2 << AUDIO_BIT_POS);
        assert_eq!(five - none, 1 << AUDIO_BIT_POS);
    }

    #[test]
    fn test_corpus_ordering_drops_non_matches() {
        // the candidates a search for Friends 1994 S5E10 might surface
        let titles = [
            "Friends S01-S10 COMPLETE 4k",
            "Friends S05 COMPLETE 2160p",
            "Friends S05E10 1080p",
            "Friends S3",
            "The Office S5E10",
        ];
        let mut scored: Vec<(&str, i64)> = titles
            .iter()
            .map(|t| (*t, score(t, "Friends", 1994, 5, 10)))
            .filter(|(_, s)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let kept: Vec<&str> = scored.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            kept,
            vec![
                "Friends S01-S10 COMPLETE 4k",
                "Friends S05 COMPLETE 2160p",
                "Friends S05E10 1080p",
            ]
        );
    }

    #[test]
    fn test_score_range_covers_match_scores() {
        let packed = score("Friends S01-S10 1994 7.1 COMPLETE 2160p", "Friends", 1994, 5, 10);
        assert!(score_range_for(Resolution::K4).contains(&packed));
        let packed = score("Oppenheimer 720p", "Oppenheimer", 0, 0, 0);
        assert!(score_range_for(Resolution::P720).contains(&packed));
        assert!(!score_range_for(Resolution::K4).contains(&packed));
    }
}
