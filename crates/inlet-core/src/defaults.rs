//! Centralized default constants for the inlet pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

use std::time::Duration;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Default maximum attempts before a job is dead-lettered.
pub const JOB_MAX_ATTEMPTS: u32 = 3;

/// Default job priority (lower runs sooner).
pub const PRIORITY_DEFAULT: i32 = 5;

/// Base delay for exponential retry backoff.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Cap for exponential retry backoff.
pub const BACKOFF_CAP_MS: u64 = 60_000;

/// Visibility lease granted to a reserved job. A stalled lease returns the
/// envelope to WAITING with an incremented attempt.
pub const VISIBILITY_LEASE: Duration = Duration::from_secs(120);

/// Retention for completed jobs before garbage collection.
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Maximum retained completed jobs per queue.
pub const COMPLETED_RETENTION_COUNT: usize = 1_000;

/// Retention for failed jobs before garbage collection.
pub const FAILED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Polling interval for workers when their queue is empty.
pub const WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Grace period for in-flight jobs during shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Minimum delay before a paginated fetch continuation re-enters the queue.
pub const CONTINUATION_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// WORKER CONCURRENCY
// =============================================================================

/// I/O-bound stages.
pub const FETCH_CONCURRENCY: usize = 5;
pub const NORMALIZE_CONCURRENCY: usize = 5;

/// CPU-bound transcoding.
pub const MEDIA_CONCURRENCY: usize = 2;

pub const ENRICHMENT_CONCURRENCY: usize = 3;

// =============================================================================
// DEDUPLICATION
// =============================================================================

/// TTL for seen-set entries in the dedup store.
pub const DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Tracking query parameters stripped during URL canonicalization.
/// `utm_` is matched as a prefix; the rest are exact names.
pub const TRACKING_PARAM_PREFIX: &str = "utm_";
pub const TRACKING_PARAMS: [&str; 2] = ["ref", "source"];

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Fallback window for kinds without an override.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Fallback max requests per window.
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 60;

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

/// Consecutive failures before a breaker opens.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Time an open breaker waits before allowing a half-open probe.
pub const BREAKER_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful probes required to close a half-open breaker.
pub const BREAKER_HALF_OPEN_PROBES: u32 = 3;

// =============================================================================
// NORMALIZE
// =============================================================================

/// Titles are truncated to this many characters.
pub const TITLE_MAX_CHARS: usize = 255;

/// Titles shorter than this need review.
pub const TITLE_MIN_CHARS: usize = 8;

/// Combined text shorter than this needs review.
pub const MIN_CONTENT_LENGTH: usize = 80;

// =============================================================================
// MEDIA
// =============================================================================

/// Cap on a single media download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Cap on a single download's size in bytes (512 MB).
pub const DOWNLOAD_MAX_BYTES: u64 = 512 * 1024 * 1024;

/// Cap on a single transcode run.
pub const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(180);

/// Frame offset for thumbnail extraction.
pub const THUMBNAIL_OFFSET_SECS: f64 = 2.0;

/// Upload retry schedule: attempts and base delay (1s/2s/4s).
pub const UPLOAD_MAX_ATTEMPTS: u32 = 3;
pub const UPLOAD_RETRY_BASE: Duration = Duration::from_secs(1);

// =============================================================================
// ENRICHMENT
// =============================================================================

/// Default embedding vector dimension.
pub const EMBED_DIMENSION: usize = 384;

/// Default embedding model name.
pub const EMBED_MODEL: &str = "all-MiniLM-L6-v2";

/// Characters of transcript/body taken into the embedding input.
pub const EMBED_SNIPPET_CHARS: usize = 2_000;

/// Hard cap on embedding input text.
pub const EMBED_INPUT_MAX_CHARS: usize = 8_192;

/// Chunk size for embedding requests; chunk vectors are mean-pooled into
/// the stored vector.
pub const EMBED_CHUNK_CHARS: usize = 2_048;

/// Timeout for transcription requests (long audio).
pub const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for embedding requests.
pub const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// HTTP
// =============================================================================

/// Timeout for CMS collaborator calls.
pub const CMS_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for adapter HTTP fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Service name sent to the collaborator on every request.
pub const SERVICE_NAME: &str = "inlet-pipeline";

/// Default daemon health port.
pub const SERVER_PORT: u16 = 8090;
