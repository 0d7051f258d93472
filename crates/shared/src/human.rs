//! Human-facing formatting helpers and small file heuristics.

use lazy_static::lazy_static;
use regex::Regex;

/// Minimum size for a file to be considered playable video (100 MB).
pub const VIDEO_MIN_BYTES: u64 = 100 * 1024 * 1024;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "webm", "mpg", "mpeg",
];

lazy_static! {
    static ref QUALITY_PRIORITY: Vec<Regex> = [
        r"(?i)\b(4K|2160p)\b",
        r"(?i)\b1080p\b",
        r"(?i)\b720p\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect();
}

/// Get a human readable string for a byte count.
///
/// Example: (1024*5) -> 5.00KB, (1024*1024*5) -> 5.00MB
pub fn format_bytes(num: u64) -> String {
    let mut num = num as f64;
    for unit in ["B", "KB", "MB"] {
        if num.abs() < 1024.0 {
            return format!("{:.2}{}", num, unit);
        }
        num /= 1024.0;
    }
    format!("{:.2}GB", num)
}

/// Rank a release name by resolution for final result ordering.
/// Higher is better; names without a recognized resolution rank last.
pub fn rank_quality(name: &str) -> u32 {
    for (index, pattern) in QUALITY_PRIORITY.iter().enumerate() {
        if pattern.is_match(name) {
            return (QUALITY_PRIORITY.len() - index) as u32;
        }
    }
    0
}

/// Arrange short strings into at most `rows` space-joined rows for display.
pub fn arrange_into_rows(strings: &[String], rows: usize) -> String {
    if strings.is_empty() || rows == 0 {
        return String::new();
    }
    let per_row = strings.len().div_ceil(rows);
    strings
        .chunks(per_row)
        .map(|chunk| chunk.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether a file looks like playable video: known extension and big enough
/// to not be a sample.
pub fn is_video_file(name: &str, size: u64) -> bool {
    if size < VIDEO_MIN_BYTES {
        return false;
    }
    let lowered = name.to_lowercase();
    VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lowered.ends_with(&format!(".{ext}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00B");
        assert_eq!(format_bytes(1024 * 5), "5.00KB");
        assert_eq!(format_bytes(1024 * 1024 * 5), "5.00MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024 * 5), "5.00GB");
    }

    #[test]
    fn test_rank_quality() {
        assert!(rank_quality("Movie 2160p BluRay") > rank_quality("Movie 1080p"));
        assert!(rank_quality("Movie 4K") > rank_quality("Movie 1080p"));
        assert!(rank_quality("Movie 1080p") > rank_quality("Movie 720p"));
        assert!(rank_quality("Movie 720p") > rank_quality("Movie DVDRip"));
        assert_eq!(rank_quality("Movie 4K"), rank_quality("Movie 2160p"));
    }

    #[test]
    fn test_arrange_into_rows() {
        let parts: Vec<String> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(arrange_into_rows(&parts, 3), "a b\nc d\ne f");
        assert_eq!(arrange_into_rows(&parts[..2], 3), "a\nb");
        assert_eq!(arrange_into_rows(&[], 3), "");
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file("Show.S05E10.mkv", 5 * 1024 * 1024 * 1024));
        assert!(!is_video_file("Show.S05E10.mkv", 10 * 1024 * 1024));
        assert!(!is_video_file("cover.jpg", 5 * 1024 * 1024 * 1024));
        assert!(is_video_file("Movie.MP4", VIDEO_MIN_BYTES));
    }
}
