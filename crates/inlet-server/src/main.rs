//! inletd: daemon hosting the inlet ingestion pipeline.
//!
//! Startup is an explicit phase sequence (config → stores → breakers →
//! clients → adapters → registry → workers → health server), torn down in
//! reverse on shutdown. No hidden lazy initialization.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use inlet_clients::{
    CmsClient, EmbeddingBackend, FsObjectStore, HttpCmsClient, HttpEmbedder, TranscriberBackend,
    WhisperClient,
};
use inlet_core::{BreakerRegistry, Config, Error, Result, SourceDescriptor};
use inlet_pipeline::{PipelineDeps, PipelineRuntime, PipelineSettings};
use inlet_sources::{build_adapters, SourceRegistry};
use inlet_store::{
    RateLimitRules, RedisDedupStore, RedisJobStore, RedisRateLimiter,
};

mod routes;

use routes::AppState;

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load and register the sources file, if configured.
async fn register_sources(config: &Config, registry: &SourceRegistry) -> Result<()> {
    let Some(path) = &config.sources_path else {
        return Ok(());
    };
    let raw = std::fs::read_to_string(path)?;
    let sources: Vec<SourceDescriptor> = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("unparsable sources file: {}", e)))?;

    for source in sources {
        if !source.enabled {
            info!(source_id = %source.id, "Skipping disabled source");
            continue;
        }
        match source.effective_poll_interval() {
            Some(_) => registry.schedule(source).await?,
            None => info!(source_id = %source.id, "Source kind is push-only, not scheduled"),
        }
    }
    Ok(())
}

async fn run() -> Result<()> {
    // Phase 1: configuration, fail fast.
    let config = Config::from_env()?;

    // Phase 2: queue/cache store connections.
    let job_store = Arc::new(RedisJobStore::connect(&config.queue_store_url).await?);
    let redis_client = redis::Client::open(config.queue_store_url.as_str())
        .map_err(|e| Error::Store(e.to_string()))?;
    let cache_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
    let dedup = Arc::new(RedisDedupStore::new(cache_conn.clone()));
    let rate_limiter = Arc::new(RedisRateLimiter::new(
        cache_conn,
        RateLimitRules::new(config.rate_limit_overrides.clone()),
    ));

    // Phase 3: per-process breaker registry.
    let breakers = BreakerRegistry::new(config.breaker);

    // Phase 4: collaborator clients.
    let cms: Arc<dyn CmsClient> = Arc::new(HttpCmsClient::new(
        &config.cms_base_url,
        &config.cms_service_token,
    ));
    if !cms.health_check().await.unwrap_or(false) {
        warn!("CMS collaborator is not reachable at startup");
    }
    let objects = Arc::new(FsObjectStore::new(&config.object_store));
    let transcriber: Option<Arc<dyn TranscriberBackend>> = config
        .transcriber_url
        .as_deref()
        .map(|url| Arc::new(WhisperClient::new(url)) as Arc<dyn TranscriberBackend>);
    if transcriber.is_none() {
        info!("No transcriber configured, transcripts disabled");
    }
    let embedder: Option<Arc<dyn EmbeddingBackend>> = config.embedding_url.as_deref().map(|url| {
        Arc::new(HttpEmbedder::new(
            url,
            &config.embedding_model,
            config.embedding_dimension,
        )) as Arc<dyn EmbeddingBackend>
    });
    if embedder.is_none() {
        info!("No embedding service configured, embeddings disabled");
    }

    // Phase 5: fetch adapters (provider-less kinds only when keys exist).
    let adapters = Arc::new(build_adapters(&config)?);

    // Phase 6: shared dependency bundle and the source registry.
    let deps = Arc::new(PipelineDeps {
        store: job_store.clone(),
        dedup,
        rate_limiter,
        breakers,
        cms,
        objects,
        transcriber,
        embedder,
        adapters,
        settings: PipelineSettings::from_config(&config),
    });
    let registry = Arc::new(SourceRegistry::new(deps.store.clone()));
    register_sources(&config, &registry).await?;

    // Phase 7: workers.
    let mut runtime = PipelineRuntime::new(deps.clone(), config.concurrency);
    runtime.start();

    // Phase 8: health surface.
    let state = AppState {
        deps: deps.clone(),
        job_store: job_store.clone(),
        registry,
    };
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/queues", get(routes::queues))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(port = config.server_port, "inletd listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    });

    // Run until the signal, then tear down in reverse order: HTTP surface
    // first, workers next, store connections drop last.
    if let Err(e) = server.await {
        error!(error = %e, "Health server failed");
    }
    runtime.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!(error = %e, "inletd failed to start");
        std::process::exit(1);
    }
}
