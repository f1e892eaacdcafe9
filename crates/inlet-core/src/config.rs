//! Pipeline configuration loaded from the environment.
//!
//! Required keys fail fast at startup with `Error::Config`; everything else
//! carries a documented default.
//!
//! | Variable | Required | Default | Effect |
//! |----------|----------|---------|--------|
//! | `INLET_CMS_BASE_URL` | yes | — | CMS collaborator base URL |
//! | `INLET_CMS_SERVICE_TOKEN` | yes | — | Bearer token for CMS calls |
//! | `INLET_QUEUE_STORE_URL` | yes | — | Redis connection URL |
//! | `INLET_OBJECT_STORE_ROOT` | no | `<tmp>/inlet-objects` | Object store root |
//! | `INLET_OBJECT_STORE_BUCKET` | no | `inlet-media` | Bucket for artifacts |
//! | `INLET_OBJECT_STORE_PUBLIC_URL` | no | `http://localhost:9000` | Public URL base |
//! | `INLET_TRANSCRIBER_URL` | no | unset | Whisper endpoint; absence disables transcripts |
//! | `INLET_EMBEDDING_URL` | no | unset | Embedding endpoint; absence disables embeddings |
//! | `INLET_EMBEDDING_MODEL` | no | `all-MiniLM-L6-v2` | Embedding model name |
//! | `INLET_EMBEDDING_DIMENSION` | no | `384` | Embedding vector length |
//! | `INLET_MEDIA_TEMP_DIR` | no | `<tmp>/inlet-media` | Scratch directory |
//! | `INLET_*_CONCURRENCY` | no | 5/5/2/3 | Per-queue worker concurrency |
//! | `INLET_BREAKER_*` | no | 5 / 30000 / 3 | Breaker tuning |
//! | `INLET_RATE_LIMIT_*` | no | 60 per 60000 ms | Rate-limit fallback |
//! | `INLET_SOURCE_ALLOWLIST_PATH` | no | unset | Domains eligible for scraping |
//! | `INLET_SOURCES_PATH` | no | unset | JSON file of sources registered at startup |
//! | `INLET_VIDEO_API_KEY` etc. | no | unset | Provider keys; absence disables the adapter |
//! | `INLET_SERVER_PORT` | no | `8090` | Daemon health port |

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::defaults;
use crate::error::{Error, Result};
use crate::models::SourceKind;

/// Object store reach and addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Root directory (filesystem backend) or endpoint URL.
    pub root: PathBuf,
    pub bucket: String,
    /// Base under which uploaded keys become publicly addressable:
    /// `<public_url>/<bucket>/<key>`.
    pub public_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A per-kind rate-limit override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Built-in per-kind defaults.
    pub fn default_for(kind: SourceKind) -> Self {
        match kind {
            SourceKind::VideoChannel => Self::new(100, Duration::from_secs(60)),
            SourceKind::Microblog => Self::new(100, Duration::from_secs(60 * 60)),
            _ => Self::new(
                defaults::RATE_LIMIT_MAX_REQUESTS,
                defaults::RATE_LIMIT_WINDOW,
            ),
        }
    }
}

/// Per-queue worker concurrency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub fetch: usize,
    pub normalize: usize,
    pub media: usize,
    pub enrichment: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            fetch: defaults::FETCH_CONCURRENCY,
            normalize: defaults::NORMALIZE_CONCURRENCY,
            media: defaults::MEDIA_CONCURRENCY,
            enrichment: defaults::ENRICHMENT_CONCURRENCY,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub cms_base_url: String,
    pub cms_service_token: String,
    pub queue_store_url: String,
    pub object_store: ObjectStoreConfig,
    pub transcriber_url: Option<String>,
    pub embedding_url: Option<String>,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub media_temp_dir: PathBuf,
    pub concurrency: ConcurrencyConfig,
    pub breaker: BreakerConfig,
    pub rate_limit_fallback: RateLimitRule,
    pub rate_limit_overrides: HashMap<SourceKind, RateLimitRule>,
    pub source_allowlist_path: Option<PathBuf>,
    pub sources_path: Option<PathBuf>,
    pub video_api_key: Option<String>,
    pub forum_api_key: Option<String>,
    pub microblog_api_key: Option<String>,
    pub server_port: u16,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("missing required variable {}", name)))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {}: {}", name, raw))),
    }
}

impl Config {
    /// Load configuration from the environment, failing fast on missing
    /// required keys or unparsable values.
    pub fn from_env() -> Result<Self> {
        let cms_base_url = required("INLET_CMS_BASE_URL")?;
        let cms_service_token = required("INLET_CMS_SERVICE_TOKEN")?;
        let queue_store_url = required("INLET_QUEUE_STORE_URL")?;

        let object_store = ObjectStoreConfig {
            root: optional("INLET_OBJECT_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("inlet-objects")),
            bucket: optional("INLET_OBJECT_STORE_BUCKET")
                .unwrap_or_else(|| "inlet-media".to_string()),
            public_url: optional("INLET_OBJECT_STORE_PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:9000".to_string()),
            region: optional("INLET_OBJECT_STORE_REGION"),
        };

        let breaker = BreakerConfig {
            failure_threshold: parse_var(
                "INLET_BREAKER_FAILURE_THRESHOLD",
                defaults::BREAKER_FAILURE_THRESHOLD,
            )?,
            reset_timeout: Duration::from_millis(parse_var(
                "INLET_BREAKER_RESET_TIMEOUT_MS",
                defaults::BREAKER_RESET_TIMEOUT.as_millis() as u64,
            )?),
            half_open_probes: parse_var(
                "INLET_BREAKER_HALF_OPEN_PROBES",
                defaults::BREAKER_HALF_OPEN_PROBES,
            )?,
        };

        let rate_limit_fallback = RateLimitRule::new(
            parse_var(
                "INLET_RATE_LIMIT_MAX_REQUESTS",
                defaults::RATE_LIMIT_MAX_REQUESTS,
            )?,
            Duration::from_millis(parse_var(
                "INLET_RATE_LIMIT_WINDOW_MS",
                defaults::RATE_LIMIT_WINDOW.as_millis() as u64,
            )?),
        );

        // Per-kind overrides: INLET_RATE_LIMIT_FEED_MAX_REQUESTS etc.
        let mut rate_limit_overrides = HashMap::new();
        for kind in SourceKind::all() {
            let upper = kind.as_str().to_ascii_uppercase();
            let max_name = format!("INLET_RATE_LIMIT_{}_MAX_REQUESTS", upper);
            let window_name = format!("INLET_RATE_LIMIT_{}_WINDOW_MS", upper);
            let built_in = RateLimitRule::default_for(kind);
            let max = parse_var(&max_name, built_in.max_requests)?;
            let window_ms = parse_var(&window_name, built_in.window.as_millis() as u64)?;
            rate_limit_overrides.insert(
                kind,
                RateLimitRule::new(max, Duration::from_millis(window_ms)),
            );
        }

        let concurrency = ConcurrencyConfig {
            fetch: parse_var("INLET_FETCH_CONCURRENCY", defaults::FETCH_CONCURRENCY)?.max(1),
            normalize: parse_var(
                "INLET_NORMALIZE_CONCURRENCY",
                defaults::NORMALIZE_CONCURRENCY,
            )?
            .max(1),
            media: parse_var("INLET_MEDIA_CONCURRENCY", defaults::MEDIA_CONCURRENCY)?.max(1),
            enrichment: parse_var(
                "INLET_ENRICHMENT_CONCURRENCY",
                defaults::ENRICHMENT_CONCURRENCY,
            )?
            .max(1),
        };

        Ok(Self {
            cms_base_url,
            cms_service_token,
            queue_store_url,
            object_store,
            transcriber_url: optional("INLET_TRANSCRIBER_URL"),
            embedding_url: optional("INLET_EMBEDDING_URL"),
            embedding_model: optional("INLET_EMBEDDING_MODEL")
                .unwrap_or_else(|| defaults::EMBED_MODEL.to_string()),
            embedding_dimension: parse_var("INLET_EMBEDDING_DIMENSION", defaults::EMBED_DIMENSION)?,
            media_temp_dir: optional("INLET_MEDIA_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("inlet-media")),
            concurrency,
            breaker,
            rate_limit_fallback,
            rate_limit_overrides,
            source_allowlist_path: optional("INLET_SOURCE_ALLOWLIST_PATH").map(PathBuf::from),
            sources_path: optional("INLET_SOURCES_PATH").map(PathBuf::from),
            video_api_key: optional("INLET_VIDEO_API_KEY"),
            forum_api_key: optional("INLET_FORUM_API_KEY"),
            microblog_api_key: optional("INLET_MICROBLOG_API_KEY"),
            server_port: parse_var("INLET_SERVER_PORT", defaults::SERVER_PORT)?,
        })
    }

    /// Effective rate-limit rule for a source kind.
    pub fn rate_limit_for(&self, kind: SourceKind) -> RateLimitRule {
        self.rate_limit_overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.rate_limit_fallback)
    }

    /// Load the domain allowlist for full-article scraping, one domain per
    /// line, `#` comments allowed. Missing path means an empty allowlist.
    pub fn load_source_allowlist(&self) -> Result<Vec<String>> {
        let Some(path) = &self.source_allowlist_path else {
            return Ok(Vec::new());
        };
        let content = std::fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.to_ascii_lowercase())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_defaults_per_kind() {
        assert_eq!(
            RateLimitRule::default_for(SourceKind::Feed),
            RateLimitRule::new(60, Duration::from_secs(60))
        );
        assert_eq!(
            RateLimitRule::default_for(SourceKind::VideoChannel),
            RateLimitRule::new(100, Duration::from_secs(60))
        );
        assert_eq!(
            RateLimitRule::default_for(SourceKind::Microblog),
            RateLimitRule::new(100, Duration::from_secs(3600))
        );
        assert_eq!(
            RateLimitRule::default_for(SourceKind::Forum),
            RateLimitRule::new(60, Duration::from_secs(60))
        );
    }

    #[test]
    fn test_concurrency_defaults() {
        let c = ConcurrencyConfig::default();
        assert_eq!(c.fetch, 5);
        assert_eq!(c.normalize, 5);
        assert_eq!(c.media, 2);
        assert_eq!(c.enrichment, 3);
    }

    #[test]
    fn test_allowlist_parsing() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# trusted domains").unwrap();
        writeln!(file, "Example.com").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  news.example.org  ").unwrap();

        let config = test_config(Some(file.path().to_path_buf()));
        let allowlist = config.load_source_allowlist().unwrap();
        assert_eq!(allowlist, vec!["example.com", "news.example.org"]);
    }

    #[test]
    fn test_allowlist_absent_path_is_empty() {
        let config = test_config(None);
        assert!(config.load_source_allowlist().unwrap().is_empty());
    }

    fn test_config(allowlist: Option<PathBuf>) -> Config {
        Config {
            cms_base_url: "http://cms.test".into(),
            cms_service_token: "token".into(),
            queue_store_url: "redis://localhost:6379".into(),
            object_store: ObjectStoreConfig {
                root: std::env::temp_dir(),
                bucket: "inlet-media".into(),
                public_url: "http://localhost:9000".into(),
                region: None,
            },
            transcriber_url: None,
            embedding_url: None,
            embedding_model: defaults::EMBED_MODEL.into(),
            embedding_dimension: defaults::EMBED_DIMENSION,
            media_temp_dir: std::env::temp_dir(),
            concurrency: ConcurrencyConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit_fallback: RateLimitRule::new(60, Duration::from_secs(60)),
            rate_limit_overrides: HashMap::new(),
            source_allowlist_path: allowlist,
            sources_path: None,
            video_api_key: None,
            forum_api_key: None,
            microblog_api_key: None,
            server_port: defaults::SERVER_PORT,
        }
    }
}
