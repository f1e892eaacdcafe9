//! Per-queue worker loop.
//!
//! Each queue is served by one worker that claims up to its concurrency in
//! jobs, executes them on a `JoinSet`, and only sleeps when the queue is
//! empty. Visibility leases are renewed by a heartbeat task while a job is
//! in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use inlet_core::{defaults, new_v7, QueueName};
use inlet_store::JobStore;

use crate::handler::{JobContext, JobHandler, JobOutcome};

/// Tuning for one queue worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }
}

/// Worker serving one queue with bounded concurrency.
pub struct QueueWorker {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    worker_id: String,
}

impl QueueWorker {
    pub fn new(store: Arc<dyn JobStore>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        let worker_id = format!("{}-{}", handler.queue().as_str(), new_v7());
        Self {
            store,
            handler,
            config,
            worker_id,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.handler.queue()
    }

    /// Run until the token is cancelled. In-flight jobs observe the same
    /// token and release themselves back to WAITING.
    pub async fn run(self, cancel: CancellationToken) {
        let queue = self.queue();
        info!(
            queue = queue.as_str(),
            worker_id = %self.worker_id,
            concurrency = self.config.concurrency,
            "Worker started"
        );
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let mut tasks = JoinSet::new();
            let mut claimed = 0usize;
            for _ in 0..self.config.concurrency {
                match self.store.reserve(queue, &self.worker_id).await {
                    Ok(Some(job)) => {
                        claimed += 1;
                        let store = self.store.clone();
                        let handler = self.handler.clone();
                        let cancel = cancel.clone();
                        tasks.spawn(async move {
                            execute_one(store, handler, job, cancel).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(queue = queue.as_str(), error = %e, "Failed to reserve job");
                        break;
                    }
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(queue = queue.as_str(), claimed, "Processing job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(queue = queue.as_str(), error = ?e, "Job task panicked");
                    }
                }
            }
        }

        info!(queue = queue.as_str(), worker_id = %self.worker_id, "Worker stopped");
    }
}

/// Execute one reserved job: heartbeat the lease, run the handler, map the
/// outcome onto a store transition.
async fn execute_one(
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    job: inlet_core::JobEnvelope,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let job_id = job.job_id.clone();
    let queue = job.queue;
    let attempt = job.attempt;
    debug!(queue = queue.as_str(), job_id = %job_id, attempt, "Processing job");

    // Renew the visibility lease at half its period while the job runs.
    let heartbeat = {
        let store = store.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            let period = defaults::VISIBILITY_LEASE / 2;
            loop {
                sleep(period).await;
                if let Err(e) = store.heartbeat(&job_id).await {
                    warn!(job_id = %job_id, error = %e, "Lease heartbeat failed");
                    break;
                }
            }
        })
    };

    let ctx = JobContext::new(job, cancel);
    let outcome = handler.execute(ctx).await;
    heartbeat.abort();

    let duration_ms = start.elapsed().as_millis() as u64;
    let transition = match outcome {
        JobOutcome::Success(_) => {
            info!(queue = queue.as_str(), job_id = %job_id, duration_ms, "Job completed");
            store.complete(&job_id).await
        }
        JobOutcome::Retry(reason) => {
            warn!(
                queue = queue.as_str(),
                job_id = %job_id,
                attempt,
                duration_ms,
                failure = %reason,
                "Job failed, handing back for retry"
            );
            store.fail(&job_id, &reason).await
        }
        JobOutcome::Discard(reason) => {
            warn!(
                queue = queue.as_str(),
                job_id = %job_id,
                duration_ms,
                failure = %reason,
                "Job discarded"
            );
            store.discard(&job_id, &reason).await
        }
        JobOutcome::Cancelled => {
            info!(queue = queue.as_str(), job_id = %job_id, "Job cancelled, releasing");
            store.release(&job_id).await
        }
    };
    if let Err(e) = transition {
        error!(queue = queue.as_str(), job_id = %job_id, error = %e, "Failed to record job outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use inlet_core::EnqueueOptions;
    use inlet_store::MemoryJobStore;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingHandler {
        queue: QueueName,
        executed: AtomicU64,
        outcome: fn() -> JobOutcome,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn queue(&self) -> QueueName {
            self.queue
        }
        async fn execute(&self, _ctx: JobContext) -> JobOutcome {
            self.executed.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    async fn drain(
        store: Arc<MemoryJobStore>,
        handler: Arc<CountingHandler>,
        run_for: Duration,
    ) {
        let worker = QueueWorker::new(
            store,
            handler,
            WorkerConfig::default()
                .with_concurrency(2)
                .with_poll_interval(10),
        );
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let join = tokio::spawn(worker.run(cancel));
        sleep(run_for).await;
        stop.cancel();
        let _ = join.await;
    }

    #[tokio::test]
    async fn test_worker_completes_jobs() {
        let store = Arc::new(MemoryJobStore::new());
        for i in 0..3 {
            store
                .enqueue(
                    QueueName::Fetch,
                    serde_json::json!({ "i": i }),
                    EnqueueOptions::default(),
                )
                .await
                .unwrap();
        }
        let handler = Arc::new(CountingHandler {
            queue: QueueName::Fetch,
            executed: AtomicU64::new(0),
            outcome: || JobOutcome::Success(None),
        });

        drain(store.clone(), handler.clone(), Duration::from_millis(200)).await;

        assert_eq!(handler.executed.load(Ordering::SeqCst), 3);
        let counts = store.counts(QueueName::Fetch).await.unwrap();
        assert_eq!(counts.completed, 3);
        assert_eq!(counts.waiting + counts.active + counts.delayed, 0);
    }

    #[tokio::test]
    async fn test_worker_discards_permanent_failures() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .enqueue(
                QueueName::Media,
                serde_json::json!({}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let handler = Arc::new(CountingHandler {
            queue: QueueName::Media,
            executed: AtomicU64::new(0),
            outcome: || JobOutcome::Discard("download too large".into()),
        });

        drain(store.clone(), handler.clone(), Duration::from_millis(150)).await;

        assert_eq!(handler.executed.load(Ordering::SeqCst), 1);
        let counts = store.counts(QueueName::Media).await.unwrap();
        assert_eq!(counts.failed, 1);
        assert!(store.dead_letters(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_retries_until_dead_letter() {
        let store = Arc::new(MemoryJobStore::new());
        let mut opts = EnqueueOptions::default().with_max_attempts(2);
        opts.backoff = inlet_core::BackoffPolicy {
            base_ms: 10,
            cap_ms: 20,
        };
        store
            .enqueue(QueueName::Media, serde_json::json!({"x": 1}), opts)
            .await
            .unwrap();
        let handler = Arc::new(CountingHandler {
            queue: QueueName::Media,
            executed: AtomicU64::new(0),
            outcome: || JobOutcome::Retry("upstream 503".into()),
        });

        drain(store.clone(), handler.clone(), Duration::from_millis(300)).await;

        assert_eq!(handler.executed.load(Ordering::SeqCst), 2);
        let dls = store.dead_letters(10).await.unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].failure_reason, "upstream 503");
    }
}
