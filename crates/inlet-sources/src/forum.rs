//! Forum board adapter.
//!
//! Polls a board listing API for recent threads. Cursor-paginated via the
//! provider's `after` token.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use inlet_core::{defaults, EngagementStats, Error, RawItem, Result, SourceDescriptor, SourceKind};

use crate::adapter::{FetchAdapter, FetchCounts, FetchOutcome};

#[derive(Debug, Deserialize)]
struct BoardResponse {
    #[serde(default)]
    posts: Vec<PostEntry>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostEntry {
    id: String,
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    created_utc: Option<i64>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    board: Option<String>,
}

pub struct ForumAdapter {
    client: reqwest::Client,
    api_key: String,
}

impl ForumAdapter {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    fn item_from_post(post: PostEntry, now: DateTime<Utc>) -> Option<RawItem> {
        let title = post.title.filter(|t| !t.trim().is_empty())?;

        let mut item = RawItem::new(post.id.clone(), SourceKind::Forum);
        item.url = post.url;
        item.title = Some(title);
        item.body = post.selftext.filter(|t| !t.trim().is_empty());
        item.author = post.author;
        item.published_at = post
            .created_utc
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
        item.engagement = Some(EngagementStats {
            score: post.score,
            comments: post.num_comments,
            ..EngagementStats::default()
        });
        item.fetched_at = now;
        if let Some(board) = post.board {
            item.attributes
                .insert("board".into(), serde_json::json!(board));
        }
        item.attributes
            .insert("post_id".into(), serde_json::json!(post.id));
        Some(item)
    }
}

#[async_trait]
impl FetchAdapter for ForumAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Forum
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
            .header(reqwest::header::USER_AGENT, defaults::SERVICE_NAME)
            .bearer_auth(&self.api_key);
        if let Some(cursor) = cursor {
            request = request.query(&[("after", cursor)]);
        }
        if let Some(max) = source.settings.max_items {
            request = request.query(&[("limit", max.to_string().as_str())]);
        }

        let response: BoardResponse = request
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .json()
            .await?;

        let now = Utc::now();
        let mut counts = FetchCounts::default();
        let mut items = Vec::new();
        for post in response.posts {
            match Self::item_from_post(post, now) {
                Some(item) => {
                    counts.fetched += 1;
                    items.push(item);
                }
                None => counts.skipped += 1,
            }
        }

        let more = response.after.is_some() && !items.is_empty();
        debug!(source_id = %source.id, item_count = items.len(), more, "Fetched forum page");
        Ok(FetchOutcome {
            items,
            next_cursor: response.after,
            more,
            counts,
            discovered: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.api_key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "posts": [
            {
                "id": "t3_abc",
                "title": "Interesting thread",
                "url": "https://forum.example/t/abc",
                "selftext": "Body text here",
                "author": "user1",
                "created_utc": 1735689600,
                "score": 42,
                "num_comments": 17,
                "board": "space"
            },
            {"id": "t3_def", "title": "   "}
        ],
        "after": "t3_abc"
    }"#;

    #[test]
    fn test_parse_board_page() {
        let response: BoardResponse = serde_json::from_str(PAGE).unwrap();
        let item =
            ForumAdapter::item_from_post(response.posts.into_iter().next().unwrap(), Utc::now())
                .unwrap();
        assert_eq!(item.external_id, "t3_abc");
        assert_eq!(item.title.as_deref(), Some("Interesting thread"));
        assert_eq!(item.body.as_deref(), Some("Body text here"));
        let engagement = item.engagement.unwrap();
        assert_eq!(engagement.score, 42);
        assert_eq!(engagement.comments, 17);
        assert_eq!(engagement.combined(), 59);
        assert_eq!(
            item.published_at.unwrap().to_rfc3339(),
            "2025-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_blank_title_skipped() {
        let response: BoardResponse = serde_json::from_str(PAGE).unwrap();
        let post = response.posts.into_iter().nth(1).unwrap();
        assert!(ForumAdapter::item_from_post(post, Utc::now()).is_none());
    }
}
