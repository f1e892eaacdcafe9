//! Core data model: sources, raw items and canonical records.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The kind of external source an item originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Feed,
    Website,
    VideoChannel,
    PodcastFeed,
    PodcastDiscovery,
    Forum,
    Microblog,
    Upload,
}

impl SourceKind {
    /// Stable string form used in queue payloads, rate-limit keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Website => "website",
            SourceKind::VideoChannel => "video_channel",
            SourceKind::PodcastFeed => "podcast_feed",
            SourceKind::PodcastDiscovery => "podcast_discovery",
            SourceKind::Forum => "forum",
            SourceKind::Microblog => "microblog",
            SourceKind::Upload => "upload",
        }
    }

    /// All kinds, in dispatch order.
    pub fn all() -> [SourceKind; 8] {
        [
            SourceKind::Feed,
            SourceKind::Website,
            SourceKind::VideoChannel,
            SourceKind::PodcastFeed,
            SourceKind::PodcastDiscovery,
            SourceKind::Forum,
            SourceKind::Microblog,
            SourceKind::Upload,
        ]
    }

    /// Default poll interval applied when a source descriptor carries none.
    ///
    /// `Upload` sources are push-only and return `None`.
    pub fn default_poll_interval(&self) -> Option<Duration> {
        match self {
            SourceKind::Feed => Some(Duration::from_secs(15 * 60)),
            SourceKind::Website => Some(Duration::from_secs(15 * 60)),
            SourceKind::VideoChannel => Some(Duration::from_secs(60 * 60)),
            SourceKind::PodcastFeed => Some(Duration::from_secs(60 * 60)),
            SourceKind::PodcastDiscovery => Some(Duration::from_secs(24 * 60 * 60)),
            SourceKind::Forum => Some(Duration::from_secs(10 * 60)),
            SourceKind::Microblog => Some(Duration::from_secs(30 * 60)),
            SourceKind::Upload => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "feed" => Ok(SourceKind::Feed),
            "website" => Ok(SourceKind::Website),
            "video_channel" => Ok(SourceKind::VideoChannel),
            "podcast_feed" => Ok(SourceKind::PodcastFeed),
            "podcast_discovery" => Ok(SourceKind::PodcastDiscovery),
            "forum" => Ok(SourceKind::Forum),
            "microblog" => Ok(SourceKind::Microblog),
            "upload" => Ok(SourceKind::Upload),
            _ => Err(format!("Invalid source kind: {}", s)),
        }
    }
}

/// Canonical content type assigned by the normalize stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Article,
    Video,
    Tweet,
    Comment,
    Podcast,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Article => "article",
            ContentType::Video => "video",
            ContentType::Tweet => "tweet",
            ContentType::Comment => "comment",
            ContentType::Podcast => "podcast",
        }
    }

    /// Whether this type carries media that flows through the media stage.
    pub fn is_media_bearing(&self) -> bool {
        matches!(self, ContentType::Video | ContentType::Podcast)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a canonical record.
///
/// Transitions follow PENDING → PROCESSING → {READY, FAILED, ARCHIVED};
/// the three right-hand states are terminal for a stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
    Archived,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Processing => "processing",
            ContentStatus::Ready => "ready",
            ContentStatus::Failed => "failed",
            ContentStatus::Archived => "archived",
        }
    }

    /// Terminal states may only be re-driven by an explicit manual trigger.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContentStatus::Ready | ContentStatus::Failed | ContentStatus::Archived
        )
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moderation decision attached to a canonical item during normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationDecision {
    AutoApproved,
    NeedsReview,
    AutoRejected,
}

impl ModerationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationDecision::AutoApproved => "auto_approved",
            ModerationDecision::NeedsReview => "needs_review",
            ModerationDecision::AutoRejected => "auto_rejected",
        }
    }
}

/// Engagement counters reported by social-style sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementStats {
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub shares: i64,
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub score: i64,
}

impl EngagementStats {
    /// Combined engagement used by the `min_engagement` source filter.
    /// Views are excluded: they inflate passive reach without signal.
    pub fn combined(&self) -> i64 {
        self.likes + self.shares + self.comments + self.score
    }
}

/// An item as produced by a fetch adapter, before normalization.
///
/// Raw items live for exactly one normalize job; source-specific fields the
/// mappers need are preserved in `attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub external_id: String,
    pub kind: SourceKind,
    pub url: Option<String>,
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<EngagementStats>,
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    pub fetched_at: DateTime<Utc>,
}

impl RawItem {
    /// Minimal constructor for adapters; optional fields start empty.
    pub fn new(external_id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            external_id: external_id.into(),
            kind,
            url: None,
            title: None,
            body: None,
            excerpt: None,
            author: None,
            published_at: None,
            thumbnail_url: None,
            duration_seconds: None,
            engagement: None,
            attributes: BTreeMap::new(),
            fetched_at: Utc::now(),
        }
    }
}

/// The normalized, source-agnostic record handed to the CMS collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub idempotency_key: String,
    pub content_type: ContentType,
    pub source_kind: SourceKind,
    pub status: ContentStatus,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_feed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl CanonicalItem {
    /// Whether the source already supplied a playable artifact, letting the
    /// pipeline skip the media stage and enrich directly.
    pub fn media_ready(&self) -> bool {
        self.attributes
            .get("media_ready")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
            && self.media_url.is_some()
    }
}

/// Keyword and engagement filters applied per source during normalize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFilters {
    /// Keep only items matching at least one keyword (case-insensitive
    /// substring over title, excerpt and body). Empty means keep all.
    #[serde(default)]
    pub include_keywords: Vec<String>,
    /// Reject items matching any keyword.
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    /// Minimum combined engagement (likes + shares + comments + score).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_engagement: Option<i64>,
}

/// Per-source settings carried on the descriptor and into normalize jobs.
///
/// Common knobs are typed; kind-specific extras (API query parameters,
/// channel handles, board names) stay in `extra` and are deserialized into
/// per-adapter structs at the mapper boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Trusted sources bypass keyword moderation and are auto-approved.
    #[serde(default)]
    pub trusted: bool,
    #[serde(default)]
    pub filters: SourceFilters,
    /// Keywords that force an `auto_rejected` moderation decision.
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    /// Minimum combined text length before an item needs review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_content_length: Option<usize>,
    /// Tags stamped onto every canonical item from this source.
    #[serde(default)]
    pub topic_tags: Vec<String>,
    /// Maximum items per fetch page, where the adapter supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    /// Kind-specific settings bag, opaque at this layer.
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub extra: JsonValue,
}

/// A registered external content source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub kind: SourceKind,
    pub display_name: String,
    /// Feed URL, channel handle or board name; interpretation is per kind.
    pub endpoint: String,
    pub enabled: bool,
    /// Poll interval in seconds; zero means "use the kind default".
    #[serde(default)]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub settings: SourceSettings,
}

impl SourceDescriptor {
    /// Effective poll interval, falling back to the kind default.
    /// Returns `None` for kinds that are never scheduled.
    pub fn effective_poll_interval(&self) -> Option<Duration> {
        if self.poll_interval_secs > 0 {
            Some(Duration::from_secs(self.poll_interval_secs))
        } else {
            self.kind.default_poll_interval()
        }
    }
}
