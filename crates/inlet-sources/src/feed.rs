//! Syndication feed adapters: articles and podcast episodes.
//!
//! Both adapters share one RSS 2.0 parser. Podcast feeds additionally read
//! enclosures: an audio enclosure makes the episode media-ready, letting
//! normalize skip the media stage and enrich straight from the audio URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use inlet_core::{defaults, Error, RawItem, Result, SourceDescriptor, SourceKind};

use crate::adapter::{FetchAdapter, FetchCounts, FetchOutcome};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    author: Option<String>,
    enclosure: Option<Enclosure>,
    #[serde(rename = "duration")]
    itunes_duration: Option<String>,
    #[serde(rename = "image")]
    itunes_image: Option<ItunesImage>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItunesImage {
    #[serde(rename = "@href")]
    href: Option<String>,
}

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(raw: &str) -> String {
    let without_tags = RE_TAGS.replace_all(raw, " ");
    RE_WS.replace_all(&without_tags, " ").trim().to_string()
}

/// Parse RSS timestamps; feeds mix RFC 2822 and RFC 3339.
pub fn parse_feed_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse itunes-style durations: `90`, `02:03` or `1:02:03`.
pub fn parse_duration_secs(raw: &str) -> Option<i64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let mut total: i64 = 0;
    for part in &parts {
        total = total.checked_mul(60)?.checked_add(part.parse::<i64>().ok()?)?;
    }
    (!parts.is_empty()).then_some(total)
}

fn fetch_feed_body(client: &reqwest::Client, endpoint: &str) -> reqwest::RequestBuilder {
    client
        .get(endpoint)
        .timeout(defaults::FETCH_TIMEOUT)
        .header(reqwest::header::USER_AGENT, defaults::SERVICE_NAME)
}

fn parse_rss(xml: &str) -> Result<Rss> {
    from_str(xml).map_err(|e| Error::InvalidData(format!("unparsable feed: {}", e)))
}

/// Adapter for article feeds (`SourceKind::Feed`).
pub struct FeedAdapter {
    client: reqwest::Client,
}

impl FeedAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn item_from_entry(feed_title: Option<&str>, entry: Item, now: DateTime<Utc>) -> Option<RawItem> {
        let external_id = entry
            .guid
            .clone()
            .or_else(|| entry.link.clone())
            .or_else(|| entry.title.clone())?;

        let mut item = RawItem::new(external_id, SourceKind::Feed);
        item.url = entry.link;
        item.title = entry.title.map(|t| strip_html(&t));
        item.excerpt = entry.description.map(|d| strip_html(&d));
        item.author = entry.author;
        item.published_at = entry.pub_date.as_deref().and_then(parse_feed_timestamp);
        item.fetched_at = now;
        if let Some(guid) = entry.guid {
            item.attributes.insert("guid".into(), serde_json::json!(guid));
        }
        if let Some(feed_title) = feed_title {
            item.attributes
                .insert("feed_title".into(), serde_json::json!(feed_title));
        }
        Some(item)
    }
}

#[async_trait]
impl FetchAdapter for FeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        _cursor: Option<&str>,
    ) -> Result<FetchOutcome> {
        let body = fetch_feed_body(&self.client, &source.endpoint)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .text()
            .await?;

        let rss = parse_rss(&body)?;
        let feed_title = rss.channel.title.clone();
        let now = Utc::now();
        let max_items = source.settings.max_items.unwrap_or(usize::MAX);

        let mut counts = FetchCounts::default();
        let mut items = Vec::new();
        for entry in rss.channel.item.into_iter().take(max_items) {
            match Self::item_from_entry(feed_title.as_deref(), entry, now) {
                Some(item) => {
                    counts.fetched += 1;
                    items.push(item);
                }
                None => counts.skipped += 1,
            }
        }
        debug!(
            source_id = %source.id,
            item_count = items.len(),
            skipped = counts.skipped,
            "Fetched feed"
        );
        Ok(FetchOutcome {
            items,
            counts,
            ..FetchOutcome::empty()
        })
    }
}

/// Adapter for podcast feeds (`SourceKind::PodcastFeed`).
pub struct PodcastFeedAdapter {
    client: reqwest::Client,
}

impl PodcastFeedAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn episode_from_entry(
        source: &SourceDescriptor,
        entry: Item,
        now: DateTime<Utc>,
    ) -> Option<RawItem> {
        let enclosure = entry.enclosure.as_ref()?;
        let enclosure_url = enclosure.url.clone()?;
        let external_id = entry
            .guid
            .clone()
            .or_else(|| entry.link.clone())
            .unwrap_or_else(|| enclosure_url.clone());

        let mut item = RawItem::new(external_id, SourceKind::PodcastFeed);
        item.url = entry.link.clone().or(Some(enclosure_url.clone()));
        item.title = entry.title.map(|t| strip_html(&t));
        item.excerpt = entry.description.map(|d| strip_html(&d));
        item.author = entry.author;
        item.published_at = entry.pub_date.as_deref().and_then(parse_feed_timestamp);
        item.duration_seconds = entry.itunes_duration.as_deref().and_then(parse_duration_secs);
        item.thumbnail_url = entry.itunes_image.and_then(|i| i.href);
        item.fetched_at = now;

        // A direct audio enclosure is a ready artifact: the media stage is
        // skipped and enrichment works from the enclosure URL.
        let audio = enclosure
            .mime
            .as_deref()
            .map(|m| m.starts_with("audio/"))
            .unwrap_or(true);
        item.attributes
            .insert("enclosure_url".into(), serde_json::json!(enclosure_url));
        item.attributes
            .insert("media_ready".into(), serde_json::json!(audio));
        item.attributes
            .insert("show".into(), serde_json::json!(source.display_name));
        Some(item)
    }
}

#[async_trait]
impl FetchAdapter for PodcastFeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::PodcastFeed
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        _cursor: Option<&str>,
    ) -> Result<FetchOutcome> {
        let body = fetch_feed_body(&self.client, &source.endpoint)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .text()
            .await?;

        let rss = parse_rss(&body)?;
        let now = Utc::now();
        let max_items = source.settings.max_items.unwrap_or(usize::MAX);

        let mut counts = FetchCounts::default();
        let mut items = Vec::new();
        for entry in rss.channel.item.into_iter().take(max_items) {
            match Self::episode_from_entry(source, entry, now) {
                Some(item) => {
                    counts.fetched += 1;
                    items.push(item);
                }
                None => counts.skipped += 1,
            }
        }
        debug!(source_id = %source.id, item_count = items.len(), "Fetched podcast feed");
        Ok(FetchOutcome {
            items,
            counts,
            ..FetchOutcome::empty()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inlet_core::SourceSettings;

    const ARTICLE_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <item>
      <title>SpaceX &lt;b&gt;launches&lt;/b&gt; again</title>
      <link>https://example.com/a?utm_source=x</link>
      <guid>a-1</guid>
      <pubDate>Wed, 01 Jan 2025 00:00:00 GMT</pubDate>
      <description>&lt;p&gt;A   launch&lt;/p&gt;</description>
    </item>
    <item>
      <description>no title and no link</description>
    </item>
  </channel>
</rss>"#;

    const PODCAST_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Example Pod</title>
    <item>
      <title>Episode 1</title>
      <link>https://pod.example.com/ep1</link>
      <guid>ep-1</guid>
      <pubDate>Wed, 01 Jan 2025 00:00:00 GMT</pubDate>
      <description>First episode</description>
      <enclosure url="https://cdn.example.com/ep1.mp3" type="audio/mpeg" length="1234"/>
      <itunes:duration>1:02:03</itunes:duration>
    </item>
    <item>
      <title>No enclosure</title>
      <link>https://pod.example.com/ep0</link>
    </item>
  </channel>
</rss>"#;

    fn source(kind: SourceKind) -> SourceDescriptor {
        SourceDescriptor {
            id: "src-1".into(),
            kind,
            display_name: "Example".into(),
            endpoint: "https://example.com/rss".into(),
            enabled: true,
            poll_interval_secs: 0,
            settings: SourceSettings::default(),
        }
    }

    #[test]
    fn test_parse_article_feed() {
        let rss = parse_rss(ARTICLE_FEED).unwrap();
        assert_eq!(rss.channel.title.as_deref(), Some("Example News"));
        assert_eq!(rss.channel.item.len(), 2);

        let now = Utc::now();
        let item = FeedAdapter::item_from_entry(
            rss.channel.title.as_deref(),
            rss.channel.item.into_iter().next().unwrap(),
            now,
        )
        .unwrap();
        assert_eq!(item.external_id, "a-1");
        assert_eq!(item.title.as_deref(), Some("SpaceX launches again"));
        assert_eq!(item.url.as_deref(), Some("https://example.com/a?utm_source=x"));
        assert_eq!(item.excerpt.as_deref(), Some("A launch"));
        assert_eq!(
            item.published_at.unwrap().to_rfc3339(),
            "2025-01-01T00:00:00+00:00"
        );
        assert_eq!(item.attributes["feed_title"], "Example News");
    }

    #[test]
    fn test_entry_without_identity_is_skipped() {
        let rss = parse_rss(ARTICLE_FEED).unwrap();
        let entry = rss.channel.item.into_iter().nth(1).unwrap();
        assert!(FeedAdapter::item_from_entry(None, entry, Utc::now()).is_none());
    }

    #[test]
    fn test_parse_podcast_episode_media_ready() {
        let rss = parse_rss(PODCAST_FEED).unwrap();
        let src = source(SourceKind::PodcastFeed);
        let item = PodcastFeedAdapter::episode_from_entry(
            &src,
            rss.channel.item.into_iter().next().unwrap(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(item.kind, SourceKind::PodcastFeed);
        assert_eq!(item.duration_seconds, Some(3723));
        assert_eq!(item.attributes["media_ready"], serde_json::json!(true));
        assert_eq!(
            item.attributes["enclosure_url"],
            serde_json::json!("https://cdn.example.com/ep1.mp3")
        );
    }

    #[test]
    fn test_episode_without_enclosure_is_skipped() {
        let rss = parse_rss(PODCAST_FEED).unwrap();
        let src = source(SourceKind::PodcastFeed);
        let entry = rss.channel.item.into_iter().nth(1).unwrap();
        assert!(PodcastFeedAdapter::episode_from_entry(&src, entry, Utc::now()).is_none());
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>A   launch</p>"), "A launch");
        assert_eq!(strip_html("plain"), "plain");
        assert_eq!(strip_html("<a href='x'>link</a> text"), "link text");
    }

    #[test]
    fn test_parse_duration_variants() {
        assert_eq!(parse_duration_secs("90"), Some(90));
        assert_eq!(parse_duration_secs("02:03"), Some(123));
        assert_eq!(parse_duration_secs("1:02:03"), Some(3723));
        assert_eq!(parse_duration_secs("abc"), None);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_feed_timestamp("Wed, 01 Jan 2025 00:00:00 GMT").is_some());
        assert!(parse_feed_timestamp("2025-01-01T00:00:00Z").is_some());
        assert!(parse_feed_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_unparsable_feed_is_invalid_data() {
        let err = parse_rss("this is not xml").unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
