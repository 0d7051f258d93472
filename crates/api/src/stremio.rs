//! Stremio addon wire models.

use serde::{Deserialize, Serialize};
use shared::config::AppConfig;

/// One playable stream entry in a stream response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub url: String,
    /// Multi-line display: file name plus a compact metadata block
    pub title: String,
    /// Short addon/provider tag shown in the stream list
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamResponse {
    pub streams: Vec<Stream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamResponse {
    /// User-visible failure: empty list plus a short message, served with
    /// HTTP 200 so the client UI shows the text.
    pub fn error(message: &str) -> Self {
        Self {
            streams: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

/// Diagnostics shape for the search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub hash: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaResponse {
    pub media: Vec<Media>,
}

/// The static addon manifest, optionally tagged with the configured
/// provider's short name.
pub fn manifest(app: &AppConfig, provider_short: Option<&str>) -> serde_json::Value {
    let name = match provider_short {
        Some(short) => format!("{} {}", app.name, short),
        None => app.name.clone(),
    };
    let id = match provider_short {
        Some(short) => format!("{}{}", app.id, short),
        None => app.id.clone(),
    };
    serde_json::json!({
        "id": id,
        "version": app.version.trim_start_matches('v'),
        "name": name,
        "description": "Search popular torrent sites and debrid caches for streamable content.",
        "catalogs": [],
        "idPrefixes": ["tt"],
        "resources": ["stream"],
        "types": ["movie", "series"],
        "behaviorHints": {
            "configurable": true,
            "configurationRequired": false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> AppConfig {
        AppConfig {
            name: "Annatar".to_string(),
            id: "community.annatar.addon.stremio".to_string(),
            version: "v0.1.0".to_string(),
        }
    }

    #[test]
    fn test_manifest_shape() {
        let manifest = manifest(&app(), Some("RD"));
        assert_eq!(manifest["name"], "Annatar RD");
        assert_eq!(manifest["version"], "0.1.0");
        assert_eq!(manifest["resources"][0], "stream");
        assert_eq!(manifest["types"], serde_json::json!(["movie", "series"]));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = StreamResponse::error("Error searching");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("Error searching"));

        let ok = StreamResponse::default();
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("error"));
    }
}
