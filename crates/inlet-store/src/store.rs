//! Job store trait: durable queues with retry, DLQ and repeatable schedules.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use inlet_core::{DeadLetter, EnqueueOptions, JobEnvelope, QueueCounts, QueueName, Result};

/// A named repeatable schedule entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub queue: QueueName,
    pub payload: JsonValue,
    pub every: Duration,
    pub next_run: DateTime<Utc>,
}

/// Lease and retention tuning shared by store implementations.
#[derive(Debug, Clone, Copy)]
pub struct StoreTuning {
    /// Visibility lease for ACTIVE jobs; a stalled lease returns the job
    /// to WAITING.
    pub visibility_lease: Duration,
    pub completed_retention: Duration,
    pub completed_retention_count: usize,
    pub failed_retention: Duration,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            visibility_lease: inlet_core::defaults::VISIBILITY_LEASE,
            completed_retention: inlet_core::defaults::COMPLETED_RETENTION,
            completed_retention_count: inlet_core::defaults::COMPLETED_RETENTION_COUNT,
            failed_retention: inlet_core::defaults::FAILED_RETENTION,
        }
    }
}

/// Durable queue store with at-least-once delivery semantics.
///
/// Implementations: [`crate::MemoryJobStore`] for tests and single-process
/// runs, [`crate::RedisJobStore`] for production.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a payload. When `opts.job_id` is supplied and a job with that
    /// id is still retained, the call is a no-op returning the existing id.
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: JsonValue,
        opts: EnqueueOptions,
    ) -> Result<String>;

    /// Atomically move the best waiting job to ACTIVE under a visibility
    /// lease held by `worker_id`. Returns `None` when the queue is empty.
    /// Ordering is priority (lower first), then enqueue time.
    async fn reserve(&self, queue: QueueName, worker_id: &str) -> Result<Option<JobEnvelope>>;

    /// Renew the visibility lease of an active job.
    async fn heartbeat(&self, job_id: &str) -> Result<()>;

    /// Terminal success.
    async fn complete(&self, job_id: &str) -> Result<()>;

    /// Terminal failure for this attempt. Re-queues with the next backoff
    /// delay while `attempt < max_attempts`, otherwise emits a dead letter.
    async fn fail(&self, job_id: &str, reason: &str) -> Result<()>;

    /// Terminal failure with no retry and no dead letter, for permanent
    /// errors whose outcome is already recorded on the content item
    /// (operators re-drive those via a manual trigger, not the DLQ).
    async fn discard(&self, job_id: &str, reason: &str) -> Result<()>;

    /// Return an active job to WAITING without consuming an attempt
    /// (cooperative cancellation during shutdown).
    async fn release(&self, job_id: &str) -> Result<()>;

    /// Register (or replace) a named repeatable producer.
    async fn schedule_repeating(
        &self,
        name: &str,
        queue: QueueName,
        payload: JsonValue,
        every: Duration,
    ) -> Result<()>;

    /// Remove a named repeatable producer.
    async fn cancel_repeating(&self, name: &str) -> Result<()>;

    /// Enqueue every due repeatable entry and advance its next run.
    /// Returns the number of jobs produced. Called by the runtime's
    /// maintenance loop.
    async fn tick_schedules(&self) -> Result<u64>;

    /// Return stalled ACTIVE jobs (expired leases) to WAITING; jobs whose
    /// attempts are exhausted are dead-lettered instead. Returns the number
    /// of envelopes touched.
    async fn expire_stalled(&self) -> Result<u64>;

    /// Garbage-collect retained completed/failed jobs by age and count.
    /// Returns the number of envelopes removed.
    async fn gc(&self) -> Result<u64>;

    /// Per-state job counts for a queue.
    async fn counts(&self, queue: QueueName) -> Result<QueueCounts>;

    /// Fetch a retained envelope by id.
    async fn get(&self, job_id: &str) -> Result<Option<JobEnvelope>>;

    /// Most recent dead letters, newest first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>>;

    /// Re-drive a dead letter back onto its original queue under a fresh
    /// job id. Returns the new id, or `None` if the entry is unknown.
    async fn requeue_dead_letter(&self, original_job_id: &str) -> Result<Option<String>>;

    /// Drop every job in a queue. Test and operator tooling only.
    async fn purge(&self, queue: QueueName) -> Result<()>;
}
