//! Queue names, job envelopes and stage payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::models::{ContentType, RawItem, SourceKind, SourceSettings};

/// The queues making up the pipeline topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Fetch,
    Normalize,
    Media,
    Enrichment,
    DeadLetter,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Fetch => "fetch",
            QueueName::Normalize => "normalize",
            QueueName::Media => "media",
            QueueName::Enrichment => "enrichment",
            QueueName::DeadLetter => "dead_letter",
        }
    }

    /// Work queues served by the runtime (the DLQ is inspect-only).
    pub fn work_queues() -> [QueueName; 4] {
        [
            QueueName::Fetch,
            QueueName::Normalize,
            QueueName::Media,
            QueueName::Enrichment,
        ]
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(QueueName::Fetch),
            "normalize" => Ok(QueueName::Normalize),
            "media" => Ok(QueueName::Media),
            "enrichment" => Ok(QueueName::Enrichment),
            "dead_letter" => Ok(QueueName::DeadLetter),
            _ => Err(format!("Invalid queue name: {}", s)),
        }
    }
}

/// Queue-level lifecycle of a job envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// Exponential backoff applied between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: crate::defaults::BACKOFF_BASE_MS,
            cap_ms: crate::defaults::BACKOFF_CAP_MS,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given attempt (1-based): `base * 2^(attempt-1)`,
    /// capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let ms = self.base_ms.saturating_mul(1u64 << exp).min(self.cap_ms);
        Duration::from_millis(ms)
    }
}

/// Options accepted by `JobStore::enqueue`.
///
/// Priority is lower-is-sooner: a priority 2 job is reserved before a
/// priority 3 job in the same queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Caller-supplied id makes the enqueue idempotent while the job is
    /// retained: re-enqueueing the same id is a no-op returning it.
    pub job_id: Option<String>,
    pub priority: i32,
    pub delay: Option<Duration>,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            priority: crate::defaults::PRIORITY_DEFAULT,
            delay: None,
            max_attempts: crate::defaults::JOB_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl EnqueueOptions {
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }
}

/// A job as stored and leased by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: String,
    pub queue: QueueName,
    pub payload: JsonValue,
    /// 1-based attempt counter; incremented on each re-queue.
    pub attempt: u32,
    pub max_attempts: u32,
    pub priority: i32,
    pub backoff: BackoffPolicy,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    pub earliest_run_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl JobEnvelope {
    /// Deserialize the payload into a concrete stage job.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(Into::into)
    }
}

/// Per-queue job counts reported by `JobStore::counts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub active: i64,
    pub delayed: i64,
    pub completed: i64,
    pub failed: i64,
}

/// What caused a fetch job to be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Schedule,
    Manual,
}

/// Payload of a job on the fetch queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchJob {
    pub source_id: String,
    pub kind: SourceKind,
    pub display_name: String,
    /// Feed URL, channel handle or board name; interpreted by the adapter.
    pub endpoint: String,
    pub settings: SourceSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub triggered_by: TriggeredBy,
    pub triggered_at: DateTime<Utc>,
}

/// Payload of a job on the normalize queue: one batch of raw items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeJob {
    pub source_id: String,
    pub kind: SourceKind,
    pub raw_items: Vec<RawItem>,
    pub source_settings: SourceSettings,
    pub parent_fetch_id: String,
}

/// Steps the media stage performs for one content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaOperation {
    Download,
    Transcode,
    Thumbnail,
}

/// Payload of a job on the media queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaJob {
    pub content_id: String,
    pub content_type: ContentType,
    pub source_url: String,
    pub operations: Vec<MediaOperation>,
    /// Platform-provided thumbnail used when frame extraction fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_thumbnail_url: Option<String>,
    /// Carried through to the enrichment job this stage enqueues.
    #[serde(default)]
    pub text_fields: TextFields,
    #[serde(default)]
    pub topic_tags: Vec<String>,
}

/// Steps the enrichment stage performs for one content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentOperation {
    Transcript,
    Embedding,
}

/// Text inputs carried into enrichment for embedding composition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextFields {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Payload of a job on the enrichment queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentJob {
    pub content_id: String,
    pub content_type: ContentType,
    pub operations: Vec<EnrichmentOperation>,
    pub text_fields: TextFields,
    /// Local processed artifact, set when enrichment follows the media stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
    /// Remote artifact URL, set for media-ready sources that skip media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
}

/// Terminal record for a job that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub original_queue: QueueName,
    pub original_job_id: String,
    pub payload: JsonValue,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Default priorities for stage fan-out (lower runs sooner).
pub mod priority {
    /// Manual triggers jump the queue.
    pub const MANUAL: i32 = 1;
    /// Enrichment and video media processing.
    pub const MEDIA_VIDEO: i32 = 2;
    pub const ENRICHMENT: i32 = 2;
    /// Podcast media is bulkier and yields to video.
    pub const MEDIA_PODCAST: i32 = 3;
    /// Scheduled fetch and normalize batches.
    pub const SCHEDULED: i32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_round_trip() {
        for q in [
            QueueName::Fetch,
            QueueName::Normalize,
            QueueName::Media,
            QueueName::Enrichment,
            QueueName::DeadLetter,
        ] {
            let parsed: QueueName = q.as_str().parse().unwrap();
            assert_eq!(parsed, q);
        }
        assert!("nope".parse::<QueueName>().is_err());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            base_ms: 1000,
            cap_ms: 8000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8000));
        // Past the cap it stays flat.
        assert_eq!(policy.delay_for(10), Duration::from_millis(8000));
        // Huge attempt numbers must not overflow.
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(8000));
    }

    #[test]
    fn test_enqueue_options_builder() {
        let opts = EnqueueOptions::default()
            .with_job_id("fetch:src-1")
            .with_priority(1)
            .with_delay(Duration::from_secs(2))
            .with_max_attempts(5);
        assert_eq!(opts.job_id.as_deref(), Some("fetch:src-1"));
        assert_eq!(opts.priority, 1);
        assert_eq!(opts.delay, Some(Duration::from_secs(2)));
        assert_eq!(opts.max_attempts, 5);
    }

    #[test]
    fn test_envelope_decode_payload() {
        let job = MediaJob {
            content_id: "c-1".into(),
            content_type: crate::models::ContentType::Video,
            source_url: "https://video.example/watch?v=v1".into(),
            operations: vec![
                MediaOperation::Download,
                MediaOperation::Transcode,
                MediaOperation::Thumbnail,
            ],
            fallback_thumbnail_url: None,
            text_fields: TextFields::default(),
            topic_tags: vec![],
        };
        let envelope = JobEnvelope {
            job_id: "j-1".into(),
            queue: QueueName::Media,
            payload: serde_json::to_value(&job).unwrap(),
            attempt: 1,
            max_attempts: 3,
            priority: priority::MEDIA_VIDEO,
            backoff: BackoffPolicy::default(),
            state: JobState::Active,
            enqueued_at: Utc::now(),
            earliest_run_at: Utc::now(),
            reserved_at: None,
            finished_at: None,
            worker_id: None,
            result: None,
            failure: None,
        };

        let decoded: MediaJob = envelope.decode().unwrap();
        assert_eq!(decoded.content_id, "c-1");
        assert_eq!(decoded.operations.len(), 3);

        let wrong: crate::Result<FetchJob> = envelope.decode();
        assert!(wrong.is_err());
    }

    #[test]
    fn test_dead_letter_serde() {
        let dl = DeadLetter {
            original_queue: QueueName::Media,
            original_job_id: "j-9".into(),
            payload: serde_json::json!({"content_id": "c-9"}),
            failure_reason: "transcode timed out".into(),
            failed_at: Utc::now(),
            attempts: 3,
        };
        let json = serde_json::to_string(&dl).unwrap();
        let back: DeadLetter = serde_json::from_str(&json).unwrap();
        assert_eq!(back.original_queue, QueueName::Media);
        assert_eq!(back.attempts, 3);
        assert_eq!(back.payload["content_id"], "c-9");
    }
}
