//! Website adapter: one page per fetch, scraped into a single item.
//!
//! Full-article body extraction only runs for domains on the configured
//! allowlist; everything else keeps the title and meta description.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use inlet_core::{defaults, idempotency, Error, RawItem, Result, SourceDescriptor, SourceKind};

use crate::adapter::{FetchAdapter, FetchCounts, FetchOutcome};
use crate::feed::strip_html;

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"));
static RE_META_DESC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta\s+name=["']description["']\s+content=["']([^"']*)["']"#)
        .expect("static regex")
});
static RE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body[^>]*>(.*?)</body>").expect("static regex"));
static RE_SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("static regex"));

/// Characters of scraped body text retained.
const BODY_MAX_CHARS: usize = 20_000;

pub struct WebsiteAdapter {
    client: reqwest::Client,
    allowlist: Vec<String>,
}

impl WebsiteAdapter {
    pub fn new(client: reqwest::Client, allowlist: Vec<String>) -> Self {
        Self { client, allowlist }
    }

    fn allowlisted(&self, url: &str) -> bool {
        idempotency::hostname(url)
            .map(|host| {
                self.allowlist
                    .iter()
                    .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
            })
            .unwrap_or(false)
    }

    fn extract(html: &str, url: &str, allow_body: bool) -> Option<RawItem> {
        let title = RE_TITLE
            .captures(html)
            .map(|c| strip_html(&c[1]))
            .filter(|t| !t.is_empty());
        let excerpt = RE_META_DESC
            .captures(html)
            .map(|c| strip_html(&c[1]))
            .filter(|d| !d.is_empty());

        title.as_ref()?;

        let body = allow_body.then(|| {
            let cleaned = RE_SCRIPT.replace_all(html, " ");
            let body_html = RE_BODY
                .captures(&cleaned)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| cleaned.to_string());
            let text = strip_html(&body_html);
            text.chars().take(BODY_MAX_CHARS).collect::<String>()
        });

        let mut item = RawItem::new(
            idempotency::canonicalize_url(url).unwrap_or_else(|| url.to_string()),
            SourceKind::Website,
        );
        item.url = Some(url.to_string());
        item.title = title;
        item.excerpt = excerpt;
        item.body = body.filter(|b| !b.is_empty());
        item.fetched_at = Utc::now();
        Some(item)
    }
}

#[async_trait]
impl FetchAdapter for WebsiteAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Website
    }

    async fn fetch(
        &self,
        source: &SourceDescriptor,
        _cursor: Option<&str>,
    ) -> Result<FetchOutcome> {
        let html = self
            .client
            .get(&source.endpoint)
            .timeout(defaults::FETCH_TIMEOUT)
            .header(reqwest::header::USER_AGENT, defaults::SERVICE_NAME)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .text()
            .await?;

        let allow_body = self.allowlisted(&source.endpoint);
        let mut counts = FetchCounts::default();
        let items = match Self::extract(&html, &source.endpoint, allow_body) {
            Some(item) => {
                counts.fetched = 1;
                vec![item]
            }
            None => {
                counts.skipped = 1;
                Vec::new()
            }
        };
        debug!(
            source_id = %source.id,
            allow_body,
            item_count = items.len(),
            "Fetched website"
        );
        Ok(FetchOutcome {
            items,
            counts,
            ..FetchOutcome::empty()
        })
    }
}
