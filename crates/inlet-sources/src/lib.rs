//! # inlet-sources
//!
//! Source-facing half of the pipeline: one fetch adapter per source kind
//! (closed-set dispatch), plus the registry that owns source descriptors
//! and their poll schedules.

pub mod adapter;
pub mod discovery;
pub mod feed;
pub mod forum;
pub mod microblog;
pub mod registry;
pub mod upload;
pub mod video_channel;
pub mod website;

pub use adapter::{AdapterSet, FetchAdapter, FetchCounts, FetchOutcome};
pub use discovery::PodcastDiscoveryAdapter;
pub use feed::{FeedAdapter, PodcastFeedAdapter};
pub use forum::ForumAdapter;
pub use microblog::MicroblogAdapter;
pub use registry::SourceRegistry;
pub use upload::UploadAdapter;
pub use video_channel::VideoChannelAdapter;
pub use website::WebsiteAdapter;

use inlet_core::{Config, Result};

/// Build the full adapter set from configuration.
///
/// Provider-backed kinds come up disabled when their API key is absent.
pub fn build_adapters(config: &Config) -> Result<AdapterSet> {
    let client = reqwest::Client::builder()
        .timeout(inlet_core::defaults::FETCH_TIMEOUT)
        .build()
        .map_err(|e| inlet_core::Error::Config(format!("http client: {}", e)))?;
    let allowlist = config.load_source_allowlist()?;

    Ok(AdapterSet {
        feed: Box::new(FeedAdapter::new(client.clone())),
        website: Box::new(WebsiteAdapter::new(client.clone(), allowlist)),
        video_channel: config
            .video_api_key
            .clone()
            .map(|key| Box::new(VideoChannelAdapter::new(client.clone(), key)) as Box<dyn FetchAdapter>),
        podcast_feed: Box::new(PodcastFeedAdapter::new(client.clone())),
        podcast_discovery: Box::new(PodcastDiscoveryAdapter::new(client.clone())),
        forum: config
            .forum_api_key
            .clone()
            .map(|key| Box::new(ForumAdapter::new(client.clone(), key)) as Box<dyn FetchAdapter>),
        microblog: config
            .microblog_api_key
            .clone()
            .map(|key| Box::new(MicroblogAdapter::new(client.clone(), key)) as Box<dyn FetchAdapter>),
        upload: Box::new(UploadAdapter),
    })
}
