//! Magnet link helpers.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BTIH: Regex = Regex::new(r"btih:([A-Fa-f0-9]{40})").unwrap();
    static ref HEX40: Regex = Regex::new(r"^[A-Fa-f0-9]{40}$").unwrap();
}

/// Extract the info-hash from a magnet URI, canonical upper-case.
pub fn parse_magnet_link(uri: &str) -> Option<String> {
    BTIH.captures(uri).map(|caps| caps[1].to_uppercase())
}

/// Build a minimal magnet URI for an info-hash.
pub fn make_magnet_link(info_hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{}", info_hash.to_uppercase())
}

/// Whether a string is a well-formed 40-hex-char info-hash. Guards against
/// corrupt legacy entries coming back out of the store.
pub fn is_info_hash(value: &str) -> bool {
    HEX40.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn test_parse_magnet_link() {
        let uri = format!("magnet:?xt=urn:btih:{HASH}&dn=Some+Movie");
        assert_eq!(parse_magnet_link(&uri), Some(HASH.to_uppercase()));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!(parse_magnet_link("magnet:?xt=urn:btih:tooshort"), None);
        assert_eq!(parse_magnet_link("https://tracker.example/1"), None);
    }

    #[test]
    fn test_round_trip() {
        let uri = make_magnet_link(HASH);
        assert_eq!(parse_magnet_link(&uri), Some(HASH.to_uppercase()));
    }

    #[test]
    fn test_is_info_hash() {
        assert!(is_info_hash(HASH));
        assert!(is_info_hash(&HASH.to_uppercase()));
        assert!(!is_info_hash("nothex"));
        assert!(!is_info_hash(&HASH[..39]));
    }
}
