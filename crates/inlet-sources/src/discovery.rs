//! Podcast directory discovery adapter.
//!
//! Fan-out adapter: it returns zero items and instead yields newly
//! discovered podcast feeds as source descriptors, which the fetch stage
//! turns into fresh fetch jobs.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use inlet_core::{defaults, Error, Result, SourceDescriptor, SourceKind, SourceSettings};

use crate::adapter::{FetchAdapter, FetchCounts, FetchOutcome};

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    feeds: Vec<DirectoryFeed>,
}

#[derive(Debug, Deserialize)]
struct DirectoryFeed {
    id: serde_json::Value,
    title: Option<String>,
    url: Option<String>,
}

pub struct PodcastDiscoveryAdapter {
    client: reqwest::Client,
}

impl PodcastDiscoveryAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn descriptor_from_feed(parent: &SourceDescriptor, feed: DirectoryFeed) -> Option<SourceDescriptor> {
        let url = feed.url?;
        let id_part = match &feed.id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(SourceDescriptor {
            id: format!("{}:feed:{}", parent.id, id_part),
            kind: SourceKind::PodcastFeed,
            display_name: feed.title.unwrap_or_else(|| url.clone()),
            endpoint: url,
            enabled: true,
            poll_interval_secs: 0,
            // Discovered feeds inherit the discovery source's filters.
            settings: SourceSettings {
                extra: serde_json::Value::Null,
                ..parent.settings.clone()
            },
        })
    }
}

#[async_trait]
impl FetchAdapter for PodcastDiscoveryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::PodcastDiscovery
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        _cursor: Option<&str>,
    ) -> Result<FetchOutcome> {
        let response: DirectoryResponse = self
            .client
            .get(&source.endpoint)
            .timeout(defaults::FETCH_TIMEOUT)
            .header(reqwest::header::USER_AGENT, defaults::SERVICE_NAME)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .json()
            .await?;

        let mut counts = FetchCounts::default();
        let mut discovered = Vec::new();
        for feed in response.feeds {
            match Self::descriptor_from_feed(source, feed) {
                Some(descriptor) => discovered.push(descriptor),
                None => counts.skipped += 1,
            }
        }
        debug!(
            source_id = %source.id,
            discovered = discovered.len(),
            "Podcast discovery pass"
        );
        Ok(FetchOutcome {
            items: Vec::new(),
            next_cursor: None,
            more: false,
            counts,
            discovered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIRECTORY: &str = r#"{
        "feeds": [
            {"id": 42, "title": "Space Pod", "url": "https://pods.example/42.xml"},
            {"id": "abc", "title": "Other Pod", "url": "https://pods.example/abc.xml"},
            {"id": 7, "title": "No url"}
        ]
    }"#;

    fn parent() -> SourceDescriptor {
        SourceDescriptor {
            id: "disc-1".into(),
            kind: SourceKind::PodcastDiscovery,
            display_name: "Directory".into(),
            endpoint: "https://pods.example/search?q=space".into(),
            enabled: true,
            poll_interval_secs: 0,
            settings: SourceSettings::default(),
        }
    }

    #[test]
    fn test_discovered_descriptors() {
        let response: DirectoryResponse = serde_json::from_str(DIRECTORY).unwrap();
        let parent = parent();
        let descriptors: Vec<_> = response
            .feeds
            .into_iter()
            .filter_map(|f| PodcastDiscoveryAdapter::descriptor_from_feed(&parent, f))
            .collect();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].id, "disc-1:feed:42");
        assert_eq!(descriptors[0].kind, SourceKind::PodcastFeed);
        assert_eq!(descriptors[0].endpoint, "https://pods.example/42.xml");
        assert_eq!(descriptors[1].id, "disc-1:feed:abc");
    }
}
