//! User-supplied addon configuration.
//!
//! The config rides in the URL as a base64-encoded JSON blob. Stremio
//! clients have produced both url-safe and standard alphabets over time, so
//! decoding tries both.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use shared::error::{AppError, AppResult};

fn default_max_results() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Provider id, see `debrid::list_providers`
    pub debrid_service: String,
    pub debrid_api_key: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Exclusion filter ids; present means "drop"
    #[serde(default)]
    pub filters: Vec<String>,
}

impl UserConfig {
    pub fn parse(b64config: &str) -> AppResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(b64config)
            .or_else(|_| STANDARD.decode(b64config))
            .map_err(|_| AppError::BadRequest("Invalid configuration".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| AppError::BadRequest("Invalid configuration".to_string()))
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(self).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let config = UserConfig {
            debrid_service: "real_debrid".to_string(),
            debrid_api_key: "token".to_string(),
            max_results: 10,
            filters: vec!["4k".to_string()],
        };
        let parsed = UserConfig::parse(&config.encode()).unwrap();
        assert_eq!(parsed.debrid_service, "real_debrid");
        assert_eq!(parsed.max_results, 10);
        assert_eq!(parsed.filters, vec!["4k".to_string()]);
    }

    #[test]
    fn test_parse_standard_alphabet() {
        let json = r#"{"debrid_service":"premiumize","debrid_api_key":"k"}"#;
        let encoded = STANDARD.encode(json);
        let parsed = UserConfig::parse(&encoded).unwrap();
        assert_eq!(parsed.debrid_service, "premiumize");
        assert_eq!(parsed.max_results, 5);
        assert!(parsed.filters.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(UserConfig::parse("!!!not-base64!!!").is_err());
        let encoded = STANDARD.encode("{\"unexpected\": true}");
        assert!(UserConfig::parse(&encoded).is_err());
    }
}
