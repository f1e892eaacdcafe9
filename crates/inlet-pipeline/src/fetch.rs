//! Fetch stage: source-kind dispatch, pagination and fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use inlet_core::{
    defaults, jobs::priority, Dependency, EnqueueOptions, Error, FetchJob, NormalizeJob, QueueName,
    Result, SourceDescriptor, SourceKind,
};
use inlet_sources::{FetchAdapter, FetchOutcome};
use inlet_store::{JobStore, RateLimiter};

use crate::deps::PipelineDeps;
use crate::handler::{JobContext, JobHandler, JobOutcome};

/// Breaker guarding a source kind's provider API, if any.
fn breaker_for(kind: SourceKind) -> Option<Dependency> {
    match kind {
        SourceKind::VideoChannel => Some(Dependency::VideoChannelApi),
        SourceKind::Forum => Some(Dependency::ForumApi),
        SourceKind::Microblog => Some(Dependency::MicroblogApi),
        _ => None,
    }
}

pub struct FetchHandler {
    deps: Arc<PipelineDeps>,
}

impl FetchHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    fn descriptor_from_job(job: &FetchJob) -> SourceDescriptor {
        SourceDescriptor {
            id: job.source_id.clone(),
            kind: job.kind,
            display_name: job.display_name.clone(),
            endpoint: job.endpoint.clone(),
            enabled: true,
            poll_interval_secs: 0,
            settings: job.settings.clone(),
        }
    }

    async fn run(&self, ctx: &JobContext, job: FetchJob) -> Result<serde_json::Value> {
        let source = Self::descriptor_from_job(&job);

        // Admission first: a denied window is empty success, not a retry
        // storm against the provider.
        let decision = self
            .deps
            .rate_limiter
            .consume(job.kind, &job.source_id)
            .await?;
        if !decision.allowed {
            info!(
                source_id = %job.source_id,
                source_kind = job.kind.as_str(),
                reset_ms = decision.reset_ms,
                "Fetch denied by rate limit, returning empty"
            );
            return Ok(serde_json::json!({ "rate_limited": true, "fetched": 0 }));
        }

        let adapter = self.deps.adapters.get(job.kind).ok_or_else(|| {
            Error::InvalidData(format!("no adapter enabled for kind {}", job.kind))
        })?;

        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancelled_err());
        }

        let outcome = match breaker_for(job.kind) {
            Some(dependency) => {
                let breaker = self.deps.breakers.get(dependency);
                breaker
                    .execute(|| adapter.fetch(&source, job.cursor.as_deref()))
                    .await?
            }
            None => adapter.fetch(&source, job.cursor.as_deref()).await?,
        };

        self.fan_out(ctx, &job, outcome).await
    }

    async fn fan_out(
        &self,
        ctx: &JobContext,
        job: &FetchJob,
        outcome: FetchOutcome,
    ) -> Result<serde_json::Value> {
        let item_count = outcome.items.len();

        // Exactly one normalize job per non-empty batch.
        if !outcome.items.is_empty() {
            let normalize = NormalizeJob {
                source_id: job.source_id.clone(),
                kind: job.kind,
                raw_items: outcome.items,
                source_settings: job.settings.clone(),
                parent_fetch_id: ctx.job.job_id.clone(),
            };
            self.deps
                .store
                .enqueue(
                    QueueName::Normalize,
                    serde_json::to_value(&normalize)?,
                    EnqueueOptions::default().with_priority(priority::SCHEDULED),
                )
                .await?;
        }

        // Discovery fan-out: each discovered feed becomes its own fetch job,
        // idempotent on the discovered source id.
        let discovered_count = outcome.discovered.len();
        for descriptor in outcome.discovered {
            let fetch = FetchJob {
                source_id: descriptor.id.clone(),
                kind: descriptor.kind,
                display_name: descriptor.display_name.clone(),
                endpoint: descriptor.endpoint.clone(),
                settings: descriptor.settings.clone(),
                cursor: None,
                triggered_by: job.triggered_by,
                triggered_at: Utc::now(),
            };
            self.deps
                .store
                .enqueue(
                    QueueName::Fetch,
                    serde_json::to_value(&fetch)?,
                    EnqueueOptions::default()
                        .with_job_id(format!("fetch:{}", descriptor.id))
                        .with_priority(priority::SCHEDULED),
                )
                .await?;
        }

        // Continuation with a floor delay so one source cannot hot-loop.
        if outcome.more {
            if let Some(cursor) = outcome.next_cursor {
                let continuation = FetchJob {
                    cursor: Some(cursor),
                    triggered_at: Utc::now(),
                    ..job.clone()
                };
                self.deps
                    .store
                    .enqueue(
                        QueueName::Fetch,
                        serde_json::to_value(&continuation)?,
                        EnqueueOptions::default()
                            .with_priority(priority::SCHEDULED)
                            .with_delay(defaults::CONTINUATION_DELAY),
                    )
                    .await?;
            } else {
                warn!(source_id = %job.source_id, "Adapter reported more pages without a cursor");
            }
        }

        info!(
            source_id = %job.source_id,
            source_kind = job.kind.as_str(),
            item_count,
            discovered = discovered_count,
            fetched = outcome.counts.fetched,
            skipped = outcome.counts.skipped,
            errors = outcome.counts.errors,
            triggered_by = ?job.triggered_by,
            "Fetch finished"
        );
        Ok(serde_json::json!({
            "fetched": outcome.counts.fetched,
            "skipped": outcome.counts.skipped,
            "errors": outcome.counts.errors,
            "discovered": discovered_count,
        }))
    }
}

#[async_trait]
impl JobHandler for FetchHandler {
    fn queue(&self) -> QueueName {
        QueueName::Fetch
    }

    async fn execute(&self, ctx: JobContext) -> JobOutcome {
        let job: FetchJob = match ctx.decode() {
            Ok(job) => job,
            Err(e) => return JobOutcome::Discard(format!("unparsable fetch payload: {}", e)),
        };
        debug!(
            source_id = %job.source_id,
            source_kind = job.kind.as_str(),
            cursor = job.cursor.as_deref().unwrap_or(""),
            "Fetch job started"
        );
        match self.run(&ctx, job).await {
            Ok(result) => JobOutcome::Success(Some(result)),
            Err(e) => JobOutcome::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_mapping_covers_provider_kinds() {
        assert_eq!(
            breaker_for(SourceKind::VideoChannel),
            Some(Dependency::VideoChannelApi)
        );
        assert_eq!(breaker_for(SourceKind::Forum), Some(Dependency::ForumApi));
        assert_eq!(
            breaker_for(SourceKind::Microblog),
            Some(Dependency::MicroblogApi)
        );
        assert_eq!(breaker_for(SourceKind::Feed), None);
        assert_eq!(breaker_for(SourceKind::Upload), None);
    }

    #[test]
    fn test_descriptor_reconstruction() {
        let job = FetchJob {
            source_id: "src-1".into(),
            kind: SourceKind::Feed,
            display_name: "Example".into(),
            endpoint: "https://example.com/rss".into(),
            settings: Default::default(),
            cursor: Some("page-2".into()),
            triggered_by: inlet_core::TriggeredBy::Manual,
            triggered_at: Utc::now(),
        };
        let descriptor = FetchHandler::descriptor_from_job(&job);
        assert_eq!(descriptor.id, "src-1");
        assert_eq!(descriptor.endpoint, "https://example.com/rss");
        assert!(descriptor.enabled);
    }
}
