//! Structured logging field names shared by every inlet crate.
//!
//! All subsystems use these constants for consistent structured fields so log
//! aggregation tools can query by standardized names across the pipeline.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, stage completions, batch summaries |
//! | DEBUG | Decision points, dispatch choices, per-job detail |
//! | TRACE | Per-item iteration |

/// Correlation ID propagated across trigger → job → sub-calls (UUIDv7).
pub const REQUEST_ID: &str = "request_id";

/// Queue a job belongs to.
pub const QUEUE: &str = "queue";

/// Job ID being processed.
pub const JOB_ID: &str = "job_id";

/// 1-based attempt counter.
pub const ATTEMPT: &str = "attempt";

/// Source being fetched or normalized.
pub const SOURCE_ID: &str = "source_id";

/// Source kind (feed, video_channel, …).
pub const SOURCE_KIND: &str = "source_kind";

/// CMS-assigned content identifier.
pub const CONTENT_ID: &str = "content_id";

/// Canonical content type (article, video, …).
pub const CONTENT_TYPE: &str = "content_type";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Items produced by a fetch or consumed by a normalize batch.
pub const ITEM_COUNT: &str = "item_count";

/// Dependency guarded by a circuit breaker.
pub const DEPENDENCY: &str = "dependency";

/// Breaker state after a transition.
pub const BREAKER_STATE: &str = "breaker_state";

/// Rate-limit denial counter label.
pub const RATE_LIMITED: &str = "rate_limited";

/// Worker identifier holding a job lease.
pub const WORKER_ID: &str = "worker_id";
