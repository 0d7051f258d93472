//! Configuration management for the Annatar addon.
//!
//! All settings are loaded from environment variables (with `.env` support
//! via dotenvy). Every variable has a default except where noted, so a bare
//! process starts against a local Redis and Jackett.

use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_INDEXERS: &str =
    "yts,eztv,kickasstorrents-ws,thepiratebay,therarbg,torrentgalaxy,bitsearch,limetorrents,badasstorrents";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub telemetry: TelemetryConfig,
    pub cors: CorsConfig,
    pub search: SearchConfig,
    pub jackett: JackettConfig,
    pub processor: ProcessorConfig,
    pub source_ip: SourceIpConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Addon display name, also used in stream names
    pub name: String,
    /// Stremio addon identifier
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
    /// "json" or "pretty"
    pub log_format: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// How long the resolver waits for fresh torrents on a cold title
    pub timeout: Duration,
    /// Search workers per indexer pool
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct JackettConfig {
    pub url: String,
    pub api_key: String,
    /// Upper bound of results an indexer worker republishes per request
    pub max_results: usize,
    /// Per-call timeout for indexer searches
    pub timeout: Duration,
    pub indexers: Vec<String>,
    /// Cached search responses, and the per-indexer search lock TTL
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub concurrency: usize,
    pub max_queue_depth: usize,
    pub magnet_resolve_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceIpConfig {
    pub forward_origin_ip: bool,
    pub origin_ip_header: String,
    pub override_origin_ip: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Ok(Self {
            app: AppConfig {
                name: env_or("APP_NAME", "Annatar"),
                id: env_or("APP_ID", "community.annatar.addon.stremio"),
                version: env_or("BUILD_VERSION", "0.1.0"),
            },
            server: ServerConfig {
                host: env_or("LISTEN_HOST", "0.0.0.0"),
                port: env_parse("LISTEN_PORT", 8000)?,
                graceful_shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT", 10)?,
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", "redis://localhost:6379"),
            },
            telemetry: TelemetryConfig {
                service_name: env_or("SERVICE_NAME", "annatar"),
                environment: env_or("ENVIRONMENT", "development"),
                log_level: env_or("LOG_LEVEL", "info"),
                log_format: env_or("LOG_FORMAT", "json"),
                otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            },
            cors: CorsConfig {
                allowed_origins: env_or("CORS_ORIGINS", "*")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            search: SearchConfig {
                timeout: Duration::from_secs(env_parse("SEARCH_TIMEOUT", 10)?),
                workers: env_parse("WORKERS", 4)?,
            },
            jackett: JackettConfig {
                url: env_or("JACKETT_URL", "http://localhost:9117"),
                api_key: env_or("JACKETT_API_KEY", ""),
                max_results: env_parse("JACKETT_MAX_RESULTS", 100)?,
                timeout: Duration::from_secs(env_parse("JACKETT_TIMEOUT", 7)?),
                indexers: env_or("JACKETT_INDEXERS", DEFAULT_INDEXERS)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                cache_ttl: Duration::from_secs(env_parse("JACKETT_CACHE_MINUTES", 15u64)? * 60),
            },
            processor: ProcessorConfig {
                concurrency: env_parse("TORRENT_PROCESSING_CONCURRENCY", 4)?,
                max_queue_depth: env_parse("TORRENT_PROCESSOR_MAX_QUEUE_DEPTH", 10_000)?,
                magnet_resolve_timeout: Duration::from_secs(env_parse(
                    "MAGNET_RESOLVE_TIMEOUT",
                    30,
                )?),
            },
            source_ip: SourceIpConfig {
                forward_origin_ip: env_or("FORWARD_ORIGIN_IP", "false")
                    .eq_ignore_ascii_case("true"),
                origin_ip_header: env_or("ORIGIN_IP_HEADER", "X-Forwarded-For"),
                override_origin_ip: env::var("OVERRIDE_ORIGIN_IP").ok(),
            },
        })
    }

    /// Get the full listen address (host:port)
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for environment variable
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_env().expect("defaults should parse");
        assert_eq!(config.app.name, "Annatar");
        assert_eq!(config.search.timeout, Duration::from_secs(10));
        assert!(config.jackett.indexers.contains(&"eztv".to_string()));
        assert_eq!(config.processor.max_queue_depth, 10_000);
    }

    #[test]
    fn test_listen_address() {
        let mut config = Config::from_env().unwrap();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 3000;
        assert_eq!(config.listen_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        std::env::set_var("__ANNATAR_TEST_PORT", "not-a-number");
        let res: Result<u16, _> = env_parse("__ANNATAR_TEST_PORT", 1);
        assert!(res.is_err());
        std::env::remove_var("__ANNATAR_TEST_PORT");
    }
}
