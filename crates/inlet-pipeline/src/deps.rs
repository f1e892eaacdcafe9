//! Shared dependency bundle handed to every stage handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use inlet_clients::{CmsClient, EmbeddingBackend, ObjectStore, TranscriberBackend};
use inlet_core::{defaults, BreakerRegistry, Config};
use inlet_sources::AdapterSet;
use inlet_store::{DedupStore, JobStore, RateLimiter};

/// Stage tuning shared across handlers.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub embedding_dimension: usize,
    pub media_temp_dir: PathBuf,
    pub dedup_ttl: Duration,
    pub download_timeout: Duration,
    pub download_max_bytes: u64,
    pub transcode_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            embedding_dimension: defaults::EMBED_DIMENSION,
            media_temp_dir: std::env::temp_dir().join("inlet-media"),
            dedup_ttl: defaults::DEDUP_TTL,
            download_timeout: defaults::DOWNLOAD_TIMEOUT,
            download_max_bytes: defaults::DOWNLOAD_MAX_BYTES,
            transcode_timeout: defaults::TRANSCODE_TIMEOUT,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            embedding_dimension: config.embedding_dimension,
            media_temp_dir: config.media_temp_dir.clone(),
            ..Self::default()
        }
    }
}

/// Everything a stage handler may need. Built once at startup, shared via
/// `Arc` across all workers.
pub struct PipelineDeps {
    pub store: Arc<dyn JobStore>,
    pub dedup: Arc<dyn DedupStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub breakers: BreakerRegistry,
    pub cms: Arc<dyn CmsClient>,
    pub objects: Arc<dyn ObjectStore>,
    pub transcriber: Option<Arc<dyn TranscriberBackend>>,
    pub embedder: Option<Arc<dyn EmbeddingBackend>>,
    pub adapters: Arc<AdapterSet>,
    pub settings: PipelineSettings,
}
