//! Fetch adapter contract and closed-set dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use inlet_core::{RawItem, Result, SourceDescriptor, SourceKind};

/// Per-fetch telemetry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCounts {
    pub fetched: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Output of one adapter call.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<RawItem>,
    /// Opaque continuation token for paginated kinds.
    pub next_cursor: Option<String>,
    /// True when a continuation fetch should be enqueued.
    pub more: bool,
    pub counts: FetchCounts,
    /// Sources discovered by discovery adapters; the fetch stage fans these
    /// out as fresh fetch jobs.
    pub discovered: Vec<SourceDescriptor>,
}

impl FetchOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One adapter per source kind.
///
/// Adapters produce [`RawItem`]s with their kind set and source-specific
/// fields preserved in `attributes`. They never touch the rate limiter or
/// the queues; the fetch stage owns both.
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(&self, source: &SourceDescriptor, cursor: Option<&str>)
        -> Result<FetchOutcome>;

    /// Whether the adapter's upstream is reachable. Defaults to healthy for
    /// adapters with no network dependency.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// The full set of adapters, one slot per kind.
///
/// Dispatch is a match over the closed [`SourceKind`] set: adding a kind
/// means extending the enum and this struct, not registering callables at
/// runtime. Slots for provider-backed kinds are `None` when the provider
/// key is absent, which disables the adapter.
pub struct AdapterSet {
    pub feed: Box<dyn FetchAdapter>,
    pub website: Box<dyn FetchAdapter>,
    pub video_channel: Option<Box<dyn FetchAdapter>>,
    pub podcast_feed: Box<dyn FetchAdapter>,
    pub podcast_discovery: Box<dyn FetchAdapter>,
    pub forum: Option<Box<dyn FetchAdapter>>,
    pub microblog: Option<Box<dyn FetchAdapter>>,
    pub upload: Box<dyn FetchAdapter>,
}

impl AdapterSet {
    /// Adapter for a kind, or `None` when the kind is disabled.
    pub fn get(&self, kind: SourceKind) -> Option<&dyn FetchAdapter> {
        match kind {
            SourceKind::Feed => Some(self.feed.as_ref()),
            SourceKind::Website => Some(self.website.as_ref()),
            SourceKind::VideoChannel => self.video_channel.as_deref(),
            SourceKind::PodcastFeed => Some(self.podcast_feed.as_ref()),
            SourceKind::PodcastDiscovery => Some(self.podcast_discovery.as_ref()),
            SourceKind::Forum => self.forum.as_deref(),
            SourceKind::Microblog => self.microblog.as_deref(),
            SourceKind::Upload => Some(self.upload.as_ref()),
        }
    }

    /// Kinds with a usable adapter.
    pub fn enabled_kinds(&self) -> Vec<SourceKind> {
        SourceKind::all()
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter(SourceKind);

    #[async_trait]
    impl FetchAdapter for StubAdapter {
        fn kind(&self) -> SourceKind {
            self.0
        }
        async fn fetch(
            &self,
            _source: &SourceDescriptor,
            _cursor: Option<&str>,
        ) -> Result<FetchOutcome> {
            Ok(FetchOutcome::empty())
        }
    }

    fn set(with_providers: bool) -> AdapterSet {
        let provider = |kind| -> Option<Box<dyn FetchAdapter>> {
            with_providers.then(|| Box::new(StubAdapter(kind)) as Box<dyn FetchAdapter>)
        };
        AdapterSet {
            feed: Box::new(StubAdapter(SourceKind::Feed)),
            website: Box::new(StubAdapter(SourceKind::Website)),
            video_channel: provider(SourceKind::VideoChannel),
            podcast_feed: Box::new(StubAdapter(SourceKind::PodcastFeed)),
            podcast_discovery: Box::new(StubAdapter(SourceKind::PodcastDiscovery)),
            forum: provider(SourceKind::Forum),
            microblog: provider(SourceKind::Microblog),
            upload: Box::new(StubAdapter(SourceKind::Upload)),
        }
    }

    #[test]
    fn test_dispatch_covers_every_kind() {
        let adapters = set(true);
        for kind in SourceKind::all() {
            let adapter = adapters.get(kind).expect("adapter present");
            assert_eq!(adapter.kind(), kind);
        }
        assert_eq!(adapters.enabled_kinds().len(), 8);
    }

    #[test]
    fn test_missing_provider_keys_disable_kinds() {
        let adapters = set(false);
        assert!(adapters.get(SourceKind::VideoChannel).is_none());
        assert!(adapters.get(SourceKind::Forum).is_none());
        assert!(adapters.get(SourceKind::Microblog).is_none());
        assert!(adapters.get(SourceKind::Feed).is_some());
        assert_eq!(adapters.enabled_kinds().len(), 5);
    }
}
