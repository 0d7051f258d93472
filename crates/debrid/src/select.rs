//! Uniform file selection inside a cached torrent.

use shared::human::is_video_file;
use torrent::TorrentMeta;
use tracing::debug;

/// Provider-agnostic view of one file inside a torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    /// Provider-specific identifier (numeric id, file name, or path)
    pub id: String,
    pub name: String,
    pub size: u64,
}

impl CandidateFile {
    fn display_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Pick the playable file for a request from the files of one torrent.
///
/// Non-video files (wrong extension or under 100 MB) are dropped, the rest
/// iterate largest-first skipping samples. With no season/episode requested
/// the biggest video wins; otherwise the first file whose parsed
/// season/episode sets contain the request does.
pub fn pick_video_file(
    files: &[CandidateFile],
    season: u32,
    episode: u32,
) -> Option<&CandidateFile> {
    let mut videos: Vec<&CandidateFile> = files
        .iter()
        .filter(|file| is_video_file(file.display_name(), file.size))
        .collect();
    videos.sort_by(|a, b| b.size.cmp(&a.size));

    for file in videos {
        let meta = TorrentMeta::parse(file.display_name());
        if meta.is_trash() {
            debug!(file = %file.name, "skipping trash file");
            continue;
        }
        if season == 0 && episode == 0 {
            return Some(file);
        }
        if meta.is_season_episode(season, episode) {
            debug!(file = %file.name, season, episode, "matched season/episode");
            return Some(file);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    fn file(id: &str, name: &str, size: u64) -> CandidateFile {
        CandidateFile {
            id: id.to_string(),
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn test_movie_takes_biggest_video() {
        let files = [
            file("1", "Movie.2023.1080p.mkv", 4 * GB),
            file("2", "Movie.2023.2160p.mkv", 20 * GB),
            file("3", "cover.jpg", 2 * 1024 * 1024),
        ];
        let picked = pick_video_file(&files, 0, 0).unwrap();
        assert_eq!(picked.id, "2");
    }

    #[test]
    fn test_season_pack_picks_requested_episode() {
        let files = [
            file("9", "Friends.S05E09.1080p.mkv", 2 * GB),
            file("10", "Friends.S05E10.1080p.mkv", 2 * GB),
            file("11", "Friends.S05E11.1080p.mkv", 2 * GB),
        ];
        let picked = pick_video_file(&files, 5, 10).unwrap();
        assert_eq!(picked.id, "10");
    }

    #[test]
    fn test_skips_samples() {
        let files = [
            file("1", "Movie.2023.Sample.mkv", GB),
            file("2", "Movie.2023.1080p.mkv", 4 * GB),
        ];
        let picked = pick_video_file(&files, 0, 0).unwrap();
        assert_eq!(picked.id, "2");
    }

    #[test]
    fn test_drops_small_and_non_video_files() {
        let files = [
            file("1", "Movie.2023.1080p.mkv", 50 * 1024 * 1024),
            file("2", "subs/Movie.srt", 2 * 1024),
        ];
        assert!(pick_video_file(&files, 0, 0).is_none());
    }

    #[test]
    fn test_no_matching_episode_yields_none() {
        let files = [file("9", "Friends.S05E09.1080p.mkv", 2 * GB)];
        assert!(pick_video_file(&files, 5, 10).is_none());
    }

    #[test]
    fn test_full_paths_parse_on_basename() {
        let files = [file(
            "1",
            "Friends Season 5/Friends.S05E10.1080p.mkv",
            2 * GB,
        )];
        let picked = pick_video_file(&files, 5, 10).unwrap();
        assert_eq!(picked.id, "1");
    }
}
