//! Video platform channel adapter.
//!
//! Polls the provider's channel API for recent uploads. Paginated: the
//! provider cursor is passed through opaquely and a continuation fetch is
//! requested while the provider reports more pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use inlet_core::{defaults, EngagementStats, Error, RawItem, Result, SourceDescriptor, SourceKind};

use crate::adapter::{FetchAdapter, FetchCounts, FetchOutcome};

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    #[serde(default)]
    videos: Vec<VideoEntry>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoEntry {
    id: String,
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    duration_seconds: Option<i64>,
    #[serde(default)]
    stats: Option<VideoStats>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoStats {
    #[serde(default)]
    views: i64,
    #[serde(default)]
    likes: i64,
    #[serde(default)]
    comments: i64,
}

pub struct VideoChannelAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl VideoChannelAdapter {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    fn item_from_entry(entry: VideoEntry, now: DateTime<Utc>) -> Option<RawItem> {
        let url = entry.url?;
        let mut item = RawItem::new(entry.id.clone(), SourceKind::VideoChannel);
        item.url = Some(url);
        item.title = entry.title;
        item.excerpt = entry.description;
        item.author = entry.channel.clone();
        item.published_at = entry.published_at;
        item.thumbnail_url = entry.thumbnail_url;
        item.duration_seconds = entry.duration_seconds;
        item.engagement = entry.stats.map(|s| EngagementStats {
            likes: s.likes,
            comments: s.comments,
            views: s.views,
            ..EngagementStats::default()
        });
        item.fetched_at = now;
        if let Some(channel) = entry.channel {
            item.attributes
                .insert("channel".into(), serde_json::json!(channel));
        }
        item.attributes
            .insert("video_id".into(), serde_json::json!(entry.id));
        Some(item)
    }
}

#[async_trait]
impl FetchAdapter for VideoChannelAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::VideoChannel
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        cursor: Option<&str>,
    ) -> Result<FetchOutcome> {
        let mut request = self
            .client
            .get(&source.endpoint)
            .timeout(defaults::FETCH_TIMEOUT)
            .query(&[("key", self.api_key.as_str())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        if let Some(max) = source.settings.max_items {
            request = request.query(&[("limit", max.to_string().as_str())]);
        }

        let response: ChannelResponse = request
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .json()
            .await?;

        let now = Utc::now();
        let mut counts = FetchCounts::default();
        let mut items = Vec::new();
        for entry in response.videos {
            match Self::item_from_entry(entry, now) {
                Some(item) => {
                    counts.fetched += 1;
                    items.push(item);
                }
                None => counts.skipped += 1,
            }
        }

        let more = response.next_cursor.is_some() && !items.is_empty();
        debug!(
            source_id = %source.id,
            item_count = items.len(),
            more,
            "Fetched video channel page"
        );
        Ok(FetchOutcome {
            items,
            next_cursor: response.next_cursor,
            more,
            counts,
            discovered: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.api_key.is_empty())
    }
}
