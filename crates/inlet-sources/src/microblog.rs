//! Microblog adapter.
//!
//! Polls an account or search timeline. Statuses carry no title; the
//! normalize mapper derives one from the text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use inlet_core::{defaults, EngagementStats, Error, RawItem, Result, SourceDescriptor, SourceKind};

use crate::adapter::{FetchAdapter, FetchCounts, FetchOutcome};

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    statuses: Vec<StatusEntry>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusEntry {
    id: String,
    text: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    like_count: i64,
    #[serde(default)]
    repost_count: i64,
    #[serde(default)]
    reply_count: i64,
}

pub struct MicroblogAdapter {
    client: reqwest::Client,
    bearer_token: String,
}

impl MicroblogAdapter {
    pub fn new(client: reqwest::Client, bearer_token: String) -> Self {
        Self {
            client,
            bearer_token,
        }
    }

    fn item_from_status(status: StatusEntry, now: DateTime<Utc>) -> Option<RawItem> {
        let text = status.text.filter(|t| !t.trim().is_empty())?;

        let mut item = RawItem::new(status.id.clone(), SourceKind::Microblog);
        item.url = status.url;
        item.body = Some(text);
        item.author = status.author.clone();
        item.published_at = status.created_at;
        item.engagement = Some(EngagementStats {
            likes: status.like_count,
            shares: status.repost_count,
            comments: status.reply_count,
            ..EngagementStats::default()
        });
        item.fetched_at = now;
        if let Some(author) = status.author {
            item.attributes
                .insert("account".into(), serde_json::json!(author));
        }
        item.attributes
            .insert("status_id".into(), serde_json::json!(status.id));
        Some(item)
    }
}

#[async_trait]
impl FetchAdapter for MicroblogAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Microblog
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
            .bearer_auth(&self.bearer_token);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        if let Some(max) = source.settings.max_items {
            request = request.query(&[("count", max.to_string().as_str())]);
        }

        let response: TimelineResponse = request
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .json()
            .await?;

        let now = Utc::now();
        let mut counts = FetchCounts::default();
        let mut items = Vec::new();
        for status in response.statuses {
            match Self::item_from_status(status, now) {
                Some(item) => {
                    counts.fetched += 1;
                    items.push(item);
                }
                None => counts.skipped += 1,
            }
        }

        let more = response.next_cursor.is_some() && !items.is_empty();
        debug!(source_id = %source.id, item_count = items.len(), more, "Fetched timeline page");
        Ok(FetchOutcome {
            items,
            next_cursor: response.next_cursor,
            more,
            counts,
            discovered: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.bearer_token.is_empty())
    }
}
