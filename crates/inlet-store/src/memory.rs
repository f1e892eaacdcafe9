//! In-memory job store for tests and single-process deployments.
//!
//! Implements the full queue contract (idempotent enqueue, visibility
//! leases, exponential backoff, dead-lettering, repeatable schedules,
//! retention GC) behind one mutex. Not durable across restarts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use inlet_core::{
    new_v7, DeadLetter, EnqueueOptions, Error, JobEnvelope, JobState, QueueCounts, QueueName,
    Result,
};

use crate::store::{JobStore, ScheduleEntry, StoreTuning};

struct Inner {
    jobs: HashMap<String, JobEnvelope>,
    schedules: HashMap<String, ScheduleEntry>,
    dead_letters: Vec<DeadLetter>,
}

/// Single-process implementation of [`JobStore`].
pub struct MemoryJobStore {
    tuning: StoreTuning,
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_tuning(StoreTuning::default())
    }

    pub fn with_tuning(tuning: StoreTuning) -> Self {
        Self {
            tuning,
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                schedules: HashMap::new(),
                dead_letters: Vec::new(),
            }),
        }
    }

    /// Promote delayed jobs whose run time has arrived.
    fn promote_due(inner: &mut Inner, now: DateTime<Utc>) {
        for job in inner.jobs.values_mut() {
            if job.state == JobState::Delayed && job.earliest_run_at <= now {
                job.state = JobState::Waiting;
            }
        }
    }

    fn dead_letter(inner: &mut Inner, job: &JobEnvelope, reason: &str, now: DateTime<Utc>) {
        inner.dead_letters.push(DeadLetter {
            original_queue: job.queue,
            original_job_id: job.job_id.clone(),
            payload: job.payload.clone(),
            failure_reason: reason.to_string(),
            failed_at: now,
            attempts: job.attempt,
        });
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: JsonValue,
        opts: EnqueueOptions,
    ) -> Result<String> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();

        if let Some(id) = &opts.job_id {
            if inner.jobs.contains_key(id) {
                debug!(job_id = %id, queue = queue.as_str(), "Duplicate enqueue ignored");
                return Ok(id.clone());
            }
        }

        let job_id = opts
            .job_id
            .clone()
            .unwrap_or_else(|| new_v7().to_string());
        let earliest_run_at = now + opts.delay.unwrap_or(Duration::ZERO);
        let state = if earliest_run_at > now {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        inner.jobs.insert(
            job_id.clone(),
            JobEnvelope {
                job_id: job_id.clone(),
                queue,
                payload,
                attempt: 0,
                max_attempts: opts.max_attempts,
                priority: opts.priority,
                backoff: opts.backoff,
                state,
                enqueued_at: now,
                earliest_run_at,
                reserved_at: None,
                finished_at: None,
                worker_id: None,
                result: None,
                failure: None,
            },
        );
        Ok(job_id)
    }

    async fn reserve(&self, queue: QueueName, worker_id: &str) -> Result<Option<JobEnvelope>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        Self::promote_due(&mut inner, now);

        let best = inner
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state == JobState::Waiting)
            .min_by_key(|j| (j.priority, j.enqueued_at))
            .map(|j| j.job_id.clone());

        let Some(job_id) = best else {
            return Ok(None);
        };
        let job = inner.jobs.get_mut(&job_id).expect("job just selected");
        job.state = JobState::Active;
        job.attempt += 1;
        job.reserved_at = Some(now);
        job.worker_id = Some(worker_id.to_string());
        Ok(Some(job.clone()))
    }

    async fn heartbeat(&self, job_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        match inner.jobs.get_mut(job_id) {
            Some(job) if job.state == JobState::Active => {
                job.reserved_at = Some(Utc::now());
                Ok(())
            }
            Some(_) => Err(Error::Store(format!("job {} is not active", job_id))),
            None => Err(Error::Store(format!("unknown job {}", job_id))),
        }
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Store(format!("unknown job {}", job_id)))?;
        job.state = JobState::Completed;
        job.finished_at = Some(Utc::now());
        job.worker_id = None;
        Ok(())
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Store(format!("unknown job {}", job_id)))?;

        job.failure = Some(reason.to_string());
        job.worker_id = None;

        if job.attempt < job.max_attempts {
            let delay = job.backoff.delay_for(job.attempt);
            job.state = JobState::Delayed;
            job.earliest_run_at = now + delay;
            job.reserved_at = None;
            debug!(
                job_id = %job_id,
                queue = job.queue.as_str(),
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                "Job failed, retrying with backoff"
            );
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(now);
            let job = job.clone();
            warn!(
                job_id = %job_id,
                queue = job.queue.as_str(),
                attempt = job.attempt,
                failure = reason,
                "Job exhausted retries, dead-lettering"
            );
            Self::dead_letter(&mut inner, &job, reason, now);
        }
        Ok(())
    }

    async fn discard(&self, job_id: &str, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Store(format!("unknown job {}", job_id)))?;
        job.state = JobState::Failed;
        job.finished_at = Some(Utc::now());
        job.failure = Some(reason.to_string());
        job.worker_id = None;
        Ok(())
    }

    async fn release(&self, job_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::Store(format!("unknown job {}", job_id)))?;
        if job.state == JobState::Active {
            job.state = JobState::Waiting;
            // Cancellation is attempt-neutral.
            job.attempt = job.attempt.saturating_sub(1);
            job.reserved_at = None;
            job.worker_id = None;
        }
        Ok(())
    }

    async fn schedule_repeating(
        &self,
        name: &str,
        queue: QueueName,
        payload: JsonValue,
        every: Duration,
    ) -> Result<()> {
        if every.is_zero() {
            return Err(Error::Store(format!(
                "schedule {} must have a non-zero interval",
                name
            )));
        }
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        // Re-registering the same name replaces the previous schedule.
        inner.schedules.insert(
            name.to_string(),
            ScheduleEntry {
                name: name.to_string(),
                queue,
                payload,
                every,
                next_run: Utc::now() + every,
            },
        );
        Ok(())
    }

    async fn cancel_repeating(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.schedules.remove(name);
        Ok(())
    }

    async fn tick_schedules(&self) -> Result<u64> {
        let now = Utc::now();
        let due: Vec<ScheduleEntry> = {
            let mut inner = self.inner.lock().expect("store mutex poisoned");
            let mut due = Vec::new();
            for entry in inner.schedules.values_mut() {
                if entry.next_run <= now {
                    due.push(entry.clone());
                    // Skip missed ticks rather than replaying a backlog.
                    while entry.next_run <= now {
                        entry.next_run = entry.next_run + entry.every;
                    }
                }
            }
            due
        };

        let mut produced = 0;
        for entry in due {
            let job_id = format!("sched:{}:{}", entry.name, entry.next_run.timestamp());
            self.enqueue(
                entry.queue,
                entry.payload.clone(),
                EnqueueOptions::default().with_job_id(job_id),
            )
            .await?;
            produced += 1;
        }
        Ok(produced)
    }

    async fn expire_stalled(&self) -> Result<u64> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.tuning.visibility_lease)
            .map_err(|e| Error::Store(e.to_string()))?;

        let stalled: Vec<String> = inner
            .jobs
            .values()
            .filter(|j| {
                j.state == JobState::Active
                    && j.reserved_at.map(|r| r + lease < now).unwrap_or(true)
            })
            .map(|j| j.job_id.clone())
            .collect();

        let mut touched = 0;
        for job_id in stalled {
            let job = inner.jobs.get_mut(&job_id).expect("job just selected");
            job.reserved_at = None;
            job.worker_id = None;
            if job.attempt >= job.max_attempts {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                job.failure = Some("visibility lease expired".to_string());
                let job = job.clone();
                Self::dead_letter(&mut inner, &job, "visibility lease expired", now);
            } else {
                warn!(job_id = %job_id, "Stalled lease, returning job to waiting");
                job.state = JobState::Waiting;
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn gc(&self) -> Result<u64> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        let completed_cutoff = now
            - chrono::Duration::from_std(self.tuning.completed_retention)
                .map_err(|e| Error::Store(e.to_string()))?;
        let failed_cutoff = now
            - chrono::Duration::from_std(self.tuning.failed_retention)
                .map_err(|e| Error::Store(e.to_string()))?;

        let before = inner.jobs.len();
        inner.jobs.retain(|_, j| match j.state {
            JobState::Completed => j.finished_at.map(|t| t >= completed_cutoff).unwrap_or(true),
            JobState::Failed => j.finished_at.map(|t| t >= failed_cutoff).unwrap_or(true),
            _ => true,
        });

        // Count cap on retained completed jobs, oldest evicted first.
        let mut completed: Vec<(String, DateTime<Utc>)> = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Completed)
            .map(|j| (j.job_id.clone(), j.finished_at.unwrap_or(j.enqueued_at)))
            .collect();
        if completed.len() > self.tuning.completed_retention_count {
            completed.sort_by_key(|(_, t)| *t);
            let excess = completed.len() - self.tuning.completed_retention_count;
            for (job_id, _) in completed.into_iter().take(excess) {
                inner.jobs.remove(&job_id);
            }
        }

        Ok((before - inner.jobs.len()) as u64)
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut counts = QueueCounts::default();
        for job in inner.jobs.values().filter(|j| j.queue == queue) {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobEnvelope>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.jobs.get(job_id).cloned())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.dead_letters.iter().rev().take(limit).cloned().collect())
    }

    async fn requeue_dead_letter(&self, original_job_id: &str) -> Result<Option<String>> {
        let entry = {
            let mut inner = self.inner.lock().expect("store mutex poisoned");
            let idx = inner
                .dead_letters
                .iter()
                .position(|d| d.original_job_id == original_job_id);
            idx.map(|i| inner.dead_letters.remove(i))
        };
        let Some(entry) = entry else {
            return Ok(None);
        };
        let new_id = self
            .enqueue(
                entry.original_queue,
                entry.payload,
                EnqueueOptions::default(),
            )
            .await?;
        Ok(Some(new_id))
    }

    async fn purge(&self, queue: QueueName) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.jobs.retain(|_, j| j.queue != queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts() -> EnqueueOptions {
        EnqueueOptions::default()
    }

    fn fast_backoff() -> EnqueueOptions {
        let mut o = EnqueueOptions::default();
        o.backoff = inlet_core::BackoffPolicy {
            base_ms: 10,
            cap_ms: 40,
        };
        o
    }

    #[tokio::test]
    async fn test_enqueue_reserve_complete() {
        let store = MemoryJobStore::new();
        let id = store
            .enqueue(QueueName::Fetch, json!({"source_id": "s1"}), opts())
            .await
            .unwrap();

        let job = store.reserve(QueueName::Fetch, "w1").await.unwrap().unwrap();
        assert_eq!(job.job_id, id);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.worker_id.as_deref(), Some("w1"));

        // The job is leased; a second reserve sees nothing.
        assert!(store.reserve(QueueName::Fetch, "w2").await.unwrap().is_none());

        store.complete(&id).await.unwrap();
        let counts = store.counts(QueueName::Fetch).await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_by_job_id() {
        let store = MemoryJobStore::new();
        let a = store
            .enqueue(
                QueueName::Fetch,
                json!({"n": 1}),
                opts().with_job_id("fetch:s1"),
            )
            .await
            .unwrap();
        let b = store
            .enqueue(
                QueueName::Fetch,
                json!({"n": 2}),
                opts().with_job_id("fetch:s1"),
            )
            .await
            .unwrap();
        assert_eq!(a, b);

        let counts = store.counts(QueueName::Fetch).await.unwrap();
        assert_eq!(counts.waiting, 1);
        // The retained payload is the first one.
        let job = store.get(&a).await.unwrap().unwrap();
        assert_eq!(job.payload["n"], 1);
    }

    #[tokio::test]
    async fn test_priority_orders_reservation() {
        let store = MemoryJobStore::new();
        store
            .enqueue(QueueName::Media, json!({"p": 3}), opts().with_priority(3))
            .await
            .unwrap();
        store
            .enqueue(QueueName::Media, json!({"p": 1}), opts().with_priority(1))
            .await
            .unwrap();
        store
            .enqueue(QueueName::Media, json!({"p": 2}), opts().with_priority(2))
            .await
            .unwrap();

        for expected in [1, 2, 3] {
            let job = store.reserve(QueueName::Media, "w").await.unwrap().unwrap();
            assert_eq!(job.payload["p"], expected);
            store.complete(&job.job_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_delayed_job_not_visible_until_due() {
        let store = MemoryJobStore::new();
        store
            .enqueue(
                QueueName::Fetch,
                json!({}),
                opts().with_delay(Duration::from_millis(30)),
            )
            .await
            .unwrap();

        assert!(store.reserve(QueueName::Fetch, "w").await.unwrap().is_none());
        let counts = store.counts(QueueName::Fetch).await.unwrap();
        assert_eq!(counts.delayed, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.reserve(QueueName::Fetch, "w").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fail_requeues_with_backoff_then_dead_letters() {
        let store = MemoryJobStore::new();
        let id = store
            .enqueue(
                QueueName::Media,
                json!({"content_id": "c1"}),
                fast_backoff().with_max_attempts(3),
            )
            .await
            .unwrap();

        for attempt in 1..=3u32 {
            // Delayed retries become visible after the short test backoff.
            let mut job = store.reserve(QueueName::Media, "w").await.unwrap();
            for _ in 0..10 {
                if job.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(15)).await;
                job = store.reserve(QueueName::Media, "w").await.unwrap();
            }
            let job = job.expect("retry visible");
            assert_eq!(job.attempt, attempt);
            store.fail(&id, "transcode crashed").await.unwrap();
        }

        // Exactly one dead letter with the original payload.
        let dls = store.dead_letters(10).await.unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].original_job_id, id);
        assert_eq!(dls[0].attempts, 3);
        assert_eq!(dls[0].payload["content_id"], "c1");
        assert_eq!(dls[0].failure_reason, "transcode crashed");

        let counts = store.counts(QueueName::Media).await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.waiting + counts.delayed, 0);
    }

    #[tokio::test]
    async fn test_release_is_attempt_neutral() {
        let store = MemoryJobStore::new();
        let id = store
            .enqueue(QueueName::Fetch, json!({}), opts())
            .await
            .unwrap();
        let job = store.reserve(QueueName::Fetch, "w").await.unwrap().unwrap();
        assert_eq!(job.attempt, 1);

        store.release(&id).await.unwrap();
        let job = store.reserve(QueueName::Fetch, "w").await.unwrap().unwrap();
        assert_eq!(job.attempt, 1, "released reservation does not count");
    }

    #[tokio::test]
    async fn test_expired_lease_returns_job_to_waiting() {
        let store = MemoryJobStore::with_tuning(StoreTuning {
            visibility_lease: Duration::from_millis(20),
            ..StoreTuning::default()
        });
        let id = store
            .enqueue(QueueName::Fetch, json!({}), opts())
            .await
            .unwrap();
        store.reserve(QueueName::Fetch, "w1").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let touched = store.expire_stalled().await.unwrap();
        assert_eq!(touched, 1);

        let job = store.reserve(QueueName::Fetch, "w2").await.unwrap().unwrap();
        assert_eq!(job.job_id, id);
        assert_eq!(job.attempt, 2, "stall consumed an attempt");
    }

    #[tokio::test]
    async fn test_heartbeat_renews_lease() {
        let store = MemoryJobStore::with_tuning(StoreTuning {
            visibility_lease: Duration::from_millis(50),
            ..StoreTuning::default()
        });
        let id = store
            .enqueue(QueueName::Fetch, json!({}), opts())
            .await
            .unwrap();
        store.reserve(QueueName::Fetch, "w").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.heartbeat(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Lease was renewed mid-way; nothing stalls.
        assert_eq!(store.expire_stalled().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_schedule_repeating_produces_jobs() {
        let store = MemoryJobStore::new();
        store
            .schedule_repeating(
                "poll:src-1",
                QueueName::Fetch,
                json!({"source_id": "src-1"}),
                Duration::from_millis(20),
            )
            .await
            .unwrap();

        assert_eq!(store.tick_schedules().await.unwrap(), 0, "not yet due");
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.tick_schedules().await.unwrap(), 1);

        let counts = store.counts(QueueName::Fetch).await.unwrap();
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn test_reregistering_schedule_replaces_previous() {
        let store = MemoryJobStore::new();
        store
            .schedule_repeating(
                "poll:src-1",
                QueueName::Fetch,
                json!({"v": 1}),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        store
            .schedule_repeating(
                "poll:src-1",
                QueueName::Fetch,
                json!({"v": 2}),
                Duration::from_millis(10),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(store.tick_schedules().await.unwrap(), 1);

        store.cancel_repeating("poll:src-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(store.tick_schedules().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gc_by_age() {
        let store = MemoryJobStore::with_tuning(StoreTuning {
            completed_retention: Duration::from_millis(10),
            ..StoreTuning::default()
        });
        let id = store
            .enqueue(QueueName::Fetch, json!({}), opts())
            .await
            .unwrap();
        store.reserve(QueueName::Fetch, "w").await.unwrap();
        store.complete(&id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.gc().await.unwrap(), 1);
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gc_by_count() {
        let store = MemoryJobStore::with_tuning(StoreTuning {
            completed_retention_count: 2,
            ..StoreTuning::default()
        });
        for i in 0..4 {
            let id = store
                .enqueue(QueueName::Fetch, json!({ "i": i }), opts())
                .await
                .unwrap();
            store.reserve(QueueName::Fetch, "w").await.unwrap();
            store.complete(&id).await.unwrap();
        }
        assert_eq!(store.gc().await.unwrap(), 2);
        let counts = store.counts(QueueName::Fetch).await.unwrap();
        assert_eq!(counts.completed, 2);
    }

    #[tokio::test]
    async fn test_requeue_dead_letter() {
        let store = MemoryJobStore::new();
        let id = store
            .enqueue(
                QueueName::Media,
                json!({"content_id": "c1"}),
                opts().with_max_attempts(1),
            )
            .await
            .unwrap();
        store.reserve(QueueName::Media, "w").await.unwrap();
        store.fail(&id, "boom").await.unwrap();
        assert_eq!(store.dead_letters(10).await.unwrap().len(), 1);

        let new_id = store.requeue_dead_letter(&id).await.unwrap().unwrap();
        assert_ne!(new_id, id);
        assert!(store.dead_letters(10).await.unwrap().is_empty());

        let job = store.reserve(QueueName::Media, "w").await.unwrap().unwrap();
        assert_eq!(job.job_id, new_id);
        assert_eq!(job.payload["content_id"], "c1");

        assert!(store.requeue_dead_letter("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_clears_queue() {
        let store = MemoryJobStore::new();
        store
            .enqueue(QueueName::Fetch, json!({}), opts())
            .await
            .unwrap();
        store
            .enqueue(QueueName::Media, json!({}), opts())
            .await
            .unwrap();

        store.purge(QueueName::Fetch).await.unwrap();
        assert_eq!(store.counts(QueueName::Fetch).await.unwrap().waiting, 0);
        assert_eq!(store.counts(QueueName::Media).await.unwrap().waiting, 1);
    }
}
