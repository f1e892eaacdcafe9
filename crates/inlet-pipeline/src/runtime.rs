//! Pipeline runtime: hosts one worker per queue plus the maintenance loop.
//!
//! Startup spawns workers for fetch, normalize, media and enrichment with
//! their configured concurrency. Shutdown is cooperative: stop reserving,
//! give in-flight jobs a grace period, force-cancel the rest, then let the
//! stores flush.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use inlet_core::{defaults, ConcurrencyConfig, QueueName};
use inlet_store::JobStore;

use crate::deps::PipelineDeps;
use crate::enrich::EnrichmentHandler;
use crate::fetch::FetchHandler;
use crate::handler::JobHandler;
use crate::media::MediaHandler;
use crate::normalize::NormalizeHandler;
use crate::worker::{QueueWorker, WorkerConfig};

/// Seconds between maintenance passes (schedules, stalled leases).
const MAINTENANCE_TICK: Duration = Duration::from_secs(1);
/// Maintenance passes between retention GC runs.
const GC_EVERY_TICKS: u32 = 60;

pub struct PipelineRuntime {
    deps: Arc<PipelineDeps>,
    concurrency: ConcurrencyConfig,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineRuntime {
    pub fn new(deps: Arc<PipelineDeps>, concurrency: ConcurrencyConfig) -> Self {
        Self {
            deps,
            concurrency,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Token observed by every worker and job.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn all queue workers and the maintenance loop.
    pub fn start(&mut self) {
        let handlers: Vec<(Arc<dyn JobHandler>, usize)> = vec![
            (
                Arc::new(FetchHandler::new(self.deps.clone())),
                self.concurrency.fetch,
            ),
            (
                Arc::new(NormalizeHandler::new(self.deps.clone())),
                self.concurrency.normalize,
            ),
            (
                Arc::new(MediaHandler::new(self.deps.clone())),
                self.concurrency.media,
            ),
            (
                Arc::new(EnrichmentHandler::new(self.deps.clone())),
                self.concurrency.enrichment,
            ),
        ];

        for (handler, concurrency) in handlers {
            let worker = QueueWorker::new(
                self.deps.store.clone(),
                handler,
                WorkerConfig::default().with_concurrency(concurrency),
            );
            self.tasks.push(tokio::spawn(worker.run(self.cancel.clone())));
        }

        let deps = self.deps.clone();
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            maintenance_loop(deps, cancel).await;
        }));

        info!(
            fetch = self.concurrency.fetch,
            normalize = self.concurrency.normalize,
            media = self.concurrency.media,
            enrichment = self.concurrency.enrichment,
            "Pipeline runtime started"
        );
    }

    /// Graceful shutdown: cancel, wait out the grace period, abort leftovers.
    pub async fn shutdown(self) {
        info!("Pipeline shutting down");
        self.cancel.cancel();

        let grace = defaults::SHUTDOWN_GRACE;
        let drain = async {
            for task in self.tasks {
                if let Err(e) = task.await {
                    if !e.is_cancelled() {
                        error!(error = ?e, "Worker task ended abnormally");
                    }
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "Grace period elapsed with work still in flight"
            );
        }
        info!("Pipeline stopped");
    }

    /// Queue counts snapshot for the health surface.
    pub async fn queue_counts(
        &self,
    ) -> inlet_core::Result<Vec<(QueueName, inlet_core::QueueCounts)>> {
        let mut out = Vec::new();
        for queue in QueueName::work_queues() {
            out.push((queue, self.deps.store.counts(queue).await?));
        }
        Ok(out)
    }
}

/// Periodic store upkeep: fire due schedules, reap stalled leases, GC
/// retained jobs.
async fn maintenance_loop(deps: Arc<PipelineDeps>, cancel: CancellationToken) {
    let mut ticks: u32 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(MAINTENANCE_TICK) => {}
        }
        ticks = ticks.wrapping_add(1);

        match deps.store.tick_schedules().await {
            Ok(produced) if produced > 0 => {
                info!(produced, "Repeatable schedules fired");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Schedule tick failed"),
        }

        match deps.store.expire_stalled().await {
            Ok(touched) if touched > 0 => {
                warn!(touched, "Recovered stalled jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Stalled-lease sweep failed"),
        }

        if ticks % GC_EVERY_TICKS == 0 {
            match deps.store.gc().await {
                Ok(removed) if removed > 0 => info!(removed, "Retention GC pass"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Retention GC failed"),
            }
        }
    }
    info!("Maintenance loop stopped");
}
