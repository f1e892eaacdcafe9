//! Normalize stage: raw items become canonical records.
//!
//! Per item: kind-specific mapping, source filters, moderation, dedup,
//! idempotent creation at the CMS, then fan-out to media or enrichment.
//! Item-level problems are absorbed into batch counters; only
//! infrastructure failures (store, CMS outage, open breaker) fail the job.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use inlet_clients::CmsClient;
use inlet_core::{
    defaults, idempotency, jobs::priority, CanonicalItem, ContentStatus, ContentType, Dependency,
    EnqueueOptions, EnrichmentJob, EnrichmentOperation, Error, MediaJob, MediaOperation,
    ModerationDecision, NormalizeJob, QueueName, RawItem, Result, SourceKind, SourceSettings,
    TextFields,
};
use inlet_store::{DedupStore, JobStore};

use crate::deps::PipelineDeps;
use crate::handler::{JobContext, JobHandler, JobOutcome};

/// Batch telemetry counters, reported as the job result.
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct BatchCounters {
    pub created: u64,
    pub duplicates: u64,
    pub filtered: u64,
    pub moderation_approved: u64,
    pub moderation_review: u64,
    pub moderation_rejected: u64,
    pub failed: u64,
}

/// Truncate to a character limit.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// Map a raw item onto its canonical form. `None` means the item lacks the
/// minimum identity (url and title) and is counted as failed.
pub fn map_item(raw: &RawItem, source_id: &str, settings: &SourceSettings) -> Option<CanonicalItem> {
    let title_source = raw.title.clone().or_else(|| {
        // Title-less kinds (statuses) derive one from the text body.
        raw.body
            .as_deref()
            .map(|body| truncate_chars(body.trim(), 120))
    });

    if raw.url.is_none() && title_source.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return None;
    }
    let title = truncate_chars(
        title_source.unwrap_or_default().trim(),
        defaults::TITLE_MAX_CHARS,
    );

    let content_type = match raw.kind {
        SourceKind::Feed | SourceKind::Website => ContentType::Article,
        SourceKind::VideoChannel => ContentType::Video,
        SourceKind::PodcastFeed | SourceKind::PodcastDiscovery => ContentType::Podcast,
        SourceKind::Forum => ContentType::Comment,
        SourceKind::Microblog => ContentType::Tweet,
        SourceKind::Upload => upload_content_type(raw),
    };

    let source_name = derive_source_name(raw, source_id);

    let attr_str = |name: &str| {
        raw.attributes
            .get(name)
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    let media_url = attr_str("enclosure_url").or_else(|| attr_str("media_url"));

    let idempotency_key = attr_str("idempotency_key").unwrap_or_else(|| {
        idempotency::derive_key(raw.url.as_deref(), Some(&title), raw.published_at)
    });

    let original_url = raw
        .url
        .as_deref()
        .and_then(idempotency::canonicalize_url)
        .or_else(|| raw.url.clone())
        .unwrap_or_else(|| idempotency_key.clone());

    let mut attributes: BTreeMap<String, serde_json::Value> = raw.attributes.clone();
    if let Some(engagement) = &raw.engagement {
        attributes.insert(
            "engagement".into(),
            serde_json::to_value(engagement).unwrap_or_default(),
        );
    }

    Some(CanonicalItem {
        idempotency_key,
        content_type,
        source_kind: raw.kind,
        status: ContentStatus::Pending,
        title,
        body_text: raw.body.clone(),
        excerpt: raw.excerpt.clone(),
        author: raw.author.clone(),
        source_name,
        source_feed_url: None,
        media_url,
        thumbnail_url: raw.thumbnail_url.clone(),
        original_url,
        duration_seconds: raw.duration_seconds,
        topic_tags: settings.topic_tags.clone(),
        attributes,
        published_at: raw.published_at,
    })
}

fn upload_content_type(raw: &RawItem) -> ContentType {
    if let Some(hint) = raw.attributes.get("content_type").and_then(|v| v.as_str()) {
        match hint {
            "video" => return ContentType::Video,
            "podcast" => return ContentType::Podcast,
            "tweet" => return ContentType::Tweet,
            "comment" => return ContentType::Comment,
            _ => return ContentType::Article,
        }
    }
    let url = raw.url.as_deref().unwrap_or("");
    if url.ends_with(".mp4") || url.ends_with(".webm") || url.ends_with(".mov") {
        ContentType::Video
    } else if url.ends_with(".mp3") || url.ends_with(".m4a") || url.ends_with(".wav") {
        ContentType::Podcast
    } else {
        ContentType::Article
    }
}

fn derive_source_name(raw: &RawItem, source_id: &str) -> String {
    let attr = |name: &str| {
        raw.attributes
            .get(name)
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    match raw.kind {
        SourceKind::Feed | SourceKind::Website => raw
            .url
            .as_deref()
            .and_then(idempotency::hostname)
            .or_else(|| attr("feed_title"))
            .unwrap_or_else(|| source_id.to_string()),
        SourceKind::VideoChannel => attr("channel")
            .or_else(|| raw.author.clone())
            .unwrap_or_else(|| source_id.to_string()),
        SourceKind::PodcastFeed | SourceKind::PodcastDiscovery => {
            attr("show").unwrap_or_else(|| source_id.to_string())
        }
        SourceKind::Forum => attr("board").unwrap_or_else(|| source_id.to_string()),
        SourceKind::Microblog => attr("account")
            .or_else(|| raw.author.clone())
            .unwrap_or_else(|| source_id.to_string()),
        SourceKind::Upload => "upload".to_string(),
    }
}

/// Case-insensitive substring match over the item's searchable text.
fn text_matches(haystacks: &[&str], keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    haystacks
        .iter()
        .any(|text| text.to_lowercase().contains(&keyword))
}

/// Apply the source's include/exclude/engagement filters. True keeps.
pub fn passes_filters(item: &CanonicalItem, raw: &RawItem, settings: &SourceSettings) -> bool {
    let haystacks: Vec<&str> = [
        Some(item.title.as_str()),
        item.excerpt.as_deref(),
        item.body_text.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();

    let filters = &settings.filters;
    if !filters.include_keywords.is_empty()
        && !filters
            .include_keywords
            .iter()
            .any(|k| text_matches(&haystacks, k))
    {
        return false;
    }
    if filters
        .exclude_keywords
        .iter()
        .any(|k| text_matches(&haystacks, k))
    {
        return false;
    }
    if let Some(min) = filters.min_engagement {
        let combined = raw.engagement.as_ref().map(|e| e.combined()).unwrap_or(0);
        if combined < min {
            return false;
        }
    }
    true
}

/// Moderation rules: trusted sources pass, blocked keywords reject, thin
/// content needs review.
pub fn moderate(item: &CanonicalItem, settings: &SourceSettings) -> ModerationDecision {
    if settings.trusted {
        return ModerationDecision::AutoApproved;
    }

    let combined = [
        Some(item.title.as_str()),
        item.excerpt.as_deref(),
        item.body_text.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");

    let haystack = [combined.as_str()];
    if settings
        .blocked_keywords
        .iter()
        .any(|k| text_matches(&haystack, k))
    {
        return ModerationDecision::AutoRejected;
    }

    let min_len = settings
        .min_content_length
        .unwrap_or(defaults::MIN_CONTENT_LENGTH);
    if item.title.chars().count() < defaults::TITLE_MIN_CHARS
        || combined.chars().count() < min_len
    {
        return ModerationDecision::NeedsReview;
    }
    ModerationDecision::AutoApproved
}

/// Resolve creation status from the moderation decision and content type.
fn creation_status(decision: ModerationDecision, content_type: ContentType) -> ContentStatus {
    match decision {
        ModerationDecision::AutoRejected => ContentStatus::Archived,
        ModerationDecision::NeedsReview => ContentStatus::Pending,
        ModerationDecision::AutoApproved => {
            if content_type.is_media_bearing() {
                // Media-bearing items reach READY through their stages.
                ContentStatus::Pending
            } else {
                ContentStatus::Ready
            }
        }
    }
}

pub struct NormalizeHandler {
    deps: Arc<PipelineDeps>,
}

impl NormalizeHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Enqueue the next stage for a freshly created record, if any.
    async fn fan_out(&self, item: &CanonicalItem, content_id: &str) -> Result<()> {
        if item.status == ContentStatus::Archived || !item.content_type.is_media_bearing() {
            return Ok(());
        }
        // Review-gated items get no compute until approved.
        let decision = item
            .attributes
            .get("moderation")
            .and_then(|m| m.get("decision"))
            .and_then(|d| d.as_str());
        if decision == Some("needs_review") {
            return Ok(());
        }

        if item.media_ready() {
            let enrich = EnrichmentJob {
                content_id: content_id.to_string(),
                content_type: item.content_type,
                operations: vec![
                    EnrichmentOperation::Transcript,
                    EnrichmentOperation::Embedding,
                ],
                text_fields: TextFields {
                    title: item.title.clone(),
                    body: item.body_text.clone(),
                    excerpt: item.excerpt.clone(),
                },
                media_path: None,
                media_url: item.media_url.clone(),
                topic_tags: item.topic_tags.clone(),
            };
            self.deps
                .store
                .enqueue(
                    QueueName::Enrichment,
                    serde_json::to_value(&enrich)?,
                    EnqueueOptions::default()
                        .with_job_id(format!("enrich:{}", content_id))
                        .with_priority(priority::ENRICHMENT),
                )
                .await?;
        } else {
            let media_priority = match item.content_type {
                ContentType::Podcast => priority::MEDIA_PODCAST,
                _ => priority::MEDIA_VIDEO,
            };
            let media = MediaJob {
                content_id: content_id.to_string(),
                content_type: item.content_type,
                source_url: item.media_url.clone().unwrap_or_else(|| item.original_url.clone()),
                operations: vec![
                    MediaOperation::Download,
                    MediaOperation::Transcode,
                    MediaOperation::Thumbnail,
                ],
                fallback_thumbnail_url: item.thumbnail_url.clone(),
                text_fields: TextFields {
                    title: item.title.clone(),
                    body: item.body_text.clone(),
                    excerpt: item.excerpt.clone(),
                },
                topic_tags: item.topic_tags.clone(),
            };
            self.deps
                .store
                .enqueue(
                    QueueName::Media,
                    serde_json::to_value(&media)?,
                    EnqueueOptions::default()
                        .with_job_id(format!("media:{}", content_id))
                        .with_priority(media_priority),
                )
                .await?;
        }
        Ok(())
    }

    async fn run(&self, ctx: &JobContext, job: NormalizeJob) -> Result<BatchCounters> {
        let mut counters = BatchCounters::default();
        let settings = &job.source_settings;
        let cms_breaker = self.deps.breakers.get(Dependency::Cms);

        for raw in &job.raw_items {
            if ctx.cancel.is_cancelled() {
                return Err(ctx.cancelled_err());
            }

            let Some(mut item) = map_item(raw, &job.source_id, settings) else {
                counters.failed += 1;
                continue;
            };

            if !passes_filters(&item, raw, settings) {
                counters.filtered += 1;
                continue;
            }

            let decision = moderate(&item, settings);
            match decision {
                ModerationDecision::AutoApproved => counters.moderation_approved += 1,
                ModerationDecision::NeedsReview => counters.moderation_review += 1,
                ModerationDecision::AutoRejected => counters.moderation_rejected += 1,
            }
            item.status = creation_status(decision, item.content_type);
            item.attributes.insert(
                "moderation".into(),
                serde_json::json!({ "decision": decision.as_str(), "reviewed": false }),
            );

            // Best-effort dedup before spending a collaborator call.
            let check = self.deps.dedup.check(&item.idempotency_key).await?;
            if check.duplicate {
                debug!(
                    source_id = %job.source_id,
                    key = %item.idempotency_key,
                    prior_id = check.prior_id.as_deref().unwrap_or(""),
                    "Duplicate item skipped"
                );
                counters.duplicates += 1;
                continue;
            }

            let created = match cms_breaker
                .execute(|| self.deps.cms.create_or_get(&item))
                .await
            {
                Ok(created) => created,
                Err(Error::UpstreamRejected(reason)) => {
                    // Item-level rejection: count it, keep the batch going.
                    warn!(
                        source_id = %job.source_id,
                        key = %item.idempotency_key,
                        failure = %reason,
                        "CMS rejected item"
                    );
                    counters.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            counters.created += 1;

            if let Err(e) = self
                .deps
                .dedup
                .mark(&item.idempotency_key, &created.id, self.deps.settings.dedup_ttl)
                .await
            {
                warn!(key = %item.idempotency_key, error = %e, "Failed to mark dedup entry");
            }

            self.fan_out(&item, &created.id).await?;
        }

        info!(
            source_id = %job.source_id,
            source_kind = job.kind.as_str(),
            item_count = job.raw_items.len(),
            created = counters.created,
            duplicates = counters.duplicates,
            filtered = counters.filtered,
            moderation_approved = counters.moderation_approved,
            moderation_review = counters.moderation_review,
            moderation_rejected = counters.moderation_rejected,
            failed = counters.failed,
            "Normalize batch finished"
        );
        Ok(counters)
    }
}

#[async_trait]
impl JobHandler for NormalizeHandler {
    fn queue(&self) -> QueueName {
        QueueName::Normalize
    }

    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        let job: NormalizeJob = match ctx.decode() {
            Ok(job) => job,
            Err(e) => return JobOutcome::Discard(format!("unparsable normalize payload: {}", e)),
        };
        match self.run(&ctx, job).await {
            Ok(counters) => JobOutcome::Success(serde_json::to_value(&counters).ok()),
            Err(e) => JobOutcome::from_error(e),
        }
    }
}
