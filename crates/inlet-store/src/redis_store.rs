//! Redis-backed job store for production deployments.
//!
//! Layout (all keys under the `inlet:` prefix):
//! - `inlet:job:<id>` — envelope JSON
//! - `inlet:q:<queue>:waiting` — zset scored by priority then arrival
//! - `inlet:q:<queue>:delayed` — zset scored by earliest-run ms
//! - `inlet:q:<queue>:active` — zset scored by lease-expiry ms
//! - `inlet:q:<queue>:completed` / `:failed` — zsets scored by finish ms
//! - `inlet:dlq` — list of dead-letter JSON, newest first
//! - `inlet:schedules` — hash of repeatable entries by name
//!
//! `ZPOPMIN` makes reservation single-winner across concurrent workers;
//! everything else tolerates concurrent writers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use inlet_core::{
    new_v7, DeadLetter, EnqueueOptions, Error, JobEnvelope, JobState, QueueCounts, QueueName,
    Result,
};

use crate::store::{JobStore, ScheduleEntry, StoreTuning};

const PREFIX: &str = "inlet";

fn job_key(id: &str) -> String {
    format!("{}:job:{}", PREFIX, id)
}

fn queue_key(queue: QueueName, state: &str) -> String {
    format!("{}:q:{}:{}", PREFIX, queue.as_str(), state)
}

fn dlq_key() -> String {
    format!("{}:dlq", PREFIX)
}

fn schedules_key() -> String {
    format!("{}:schedules", PREFIX)
}

fn seq_key() -> String {
    format!("{}:seq", PREFIX)
}

/// Waiting-zset score: priority is the major axis, arrival order the minor.
fn waiting_score(priority: i32, seq: u64) -> f64 {
    priority as f64 * 1e12 + seq as f64
}

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

/// Production implementation of [`JobStore`] over Redis.
pub struct RedisJobStore {
    conn: ConnectionManager,
    tuning: StoreTuning,
}

impl RedisJobStore {
    /// Connect to the queue store.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_tuning(url, StoreTuning::default()).await
    }

    pub async fn connect_with_tuning(url: &str, tuning: StoreTuning) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        info!("Connected to queue store");
        Ok(Self { conn, tuning })
    }

    /// Liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<JobEnvelope>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(job_key(job_id)).await.map_err(store_err)?;
        raw.map(|r| serde_json::from_str(&r).map_err(Into::into))
            .transpose()
    }

    async fn save(&self, job: &JobEnvelope) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(job_key(&job.job_id), raw)
            .await
            .map_err(store_err)
    }

    async fn next_seq(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.incr(seq_key(), 1).await.map_err(store_err)
    }

    /// Move due delayed jobs into the waiting zset.
    async fn promote_due(&self, queue: QueueName) -> Result<()> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(queue_key(queue, "delayed"), f64::MIN, now_ms as f64, 0, 100)
            .await
            .map_err(store_err)?;

        for job_id in due {
            // Single winner per promotion: the ZREM claims the member.
            let removed: i64 = conn
                .zrem(queue_key(queue, "delayed"), &job_id)
                .await
                .map_err(store_err)?;
            if removed == 0 {
                continue;
            }
            if let Some(mut job) = self.load(&job_id).await? {
                job.state = JobState::Waiting;
                self.save(&job).await?;
                let seq = self.next_seq().await?;
                conn.zadd::<_, _, _, ()>(
                    queue_key(queue, "waiting"),
                    &job_id,
                    waiting_score(job.priority, seq),
                )
                .await
                .map_err(store_err)?;
            }
        }
        Ok(())
    }

    async fn push_dead_letter(&self, job: &JobEnvelope, reason: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let entry = DeadLetter {
            original_queue: job.queue,
            original_job_id: job.job_id.clone(),
            payload: job.payload.clone(),
            failure_reason: reason.to_string(),
            failed_at: Utc::now(),
            attempts: job.attempt,
        };
        conn.lpush::<_, _, ()>(dlq_key(), serde_json::to_string(&entry)?)
            .await
            .map_err(store_err)
    }

    async fn expire_stalled_for(&self, queue: QueueName) -> Result<u64> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let stalled: Vec<String> = conn
            .zrangebyscore_limit(queue_key(queue, "active"), f64::MIN, now_ms as f64, 0, 100)
            .await
            .map_err(store_err)?;

        let mut touched = 0;
        for job_id in stalled {
            let removed: i64 = conn
                .zrem(queue_key(queue, "active"), &job_id)
                .await
                .map_err(store_err)?;
            if removed == 0 {
                continue;
            }
            let Some(mut job) = self.load(&job_id).await? else {
                continue;
            };
            job.reserved_at = None;
            job.worker_id = None;
            if job.attempt >= job.max_attempts {
                job.state = JobState::Failed;
                job.finished_at = Some(Utc::now());
                job.failure = Some("visibility lease expired".to_string());
                self.save(&job).await?;
                conn.zadd::<_, _, _, ()>(
                    queue_key(queue, "failed"),
                    &job_id,
                    now_ms as f64,
                )
                .await
                .map_err(store_err)?;
                self.push_dead_letter(&job, "visibility lease expired").await?;
            } else {
                warn!(job_id = %job_id, queue = queue.as_str(), "Stalled lease, returning job to waiting");
                job.state = JobState::Waiting;
                self.save(&job).await?;
                let seq = self.next_seq().await?;
                conn.zadd::<_, _, _, ()>(
                    queue_key(queue, "waiting"),
                    &job_id,
                    waiting_score(job.priority, seq),
                )
                .await
                .map_err(store_err)?;
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn gc_zset(&self, key: String, cutoff_ms: i64, count_cap: Option<usize>) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut removed = 0u64;

        let old: Vec<String> = conn
            .zrangebyscore(&key, f64::MIN, cutoff_ms as f64)
            .await
            .map_err(store_err)?;
        for job_id in &old {
            conn.del::<_, ()>(job_key(job_id)).await.map_err(store_err)?;
            removed += 1;
        }
        if !old.is_empty() {
            conn.zrembyscore::<_, _, _, ()>(&key, f64::MIN, cutoff_ms as f64)
                .await
                .map_err(store_err)?;
        }

        if let Some(cap) = count_cap {
            let len: usize = conn.zcard(&key).await.map_err(store_err)?;
            if len > cap {
                let excess = (len - cap) as isize;
                let oldest: Vec<String> = conn
                    .zrange(&key, 0, excess - 1)
                    .await
                    .map_err(store_err)?;
                for job_id in &oldest {
                    conn.del::<_, ()>(job_key(job_id)).await.map_err(store_err)?;
                    conn.zrem::<_, _, ()>(&key, job_id).await.map_err(store_err)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: JsonValue,
        opts: EnqueueOptions,
    ) -> Result<String> {
        let mut conn = self.conn.clone();
        let now = Utc::now();

        if let Some(id) = &opts.job_id {
            let exists: bool = conn.exists(job_key(id)).await.map_err(store_err)?;
            if exists {
                debug!(job_id = %id, queue = queue.as_str(), "Duplicate enqueue ignored");
                return Ok(id.clone());
            }
        }

        let job_id = opts.job_id.clone().unwrap_or_else(|| new_v7().to_string());
        let earliest_run_at = now + opts.delay.unwrap_or(Duration::ZERO);
        let delayed = earliest_run_at > now;

        let job = JobEnvelope {
            job_id: job_id.clone(),
            queue,
            payload,
            attempt: 0,
            max_attempts: opts.max_attempts,
            priority: opts.priority,
            backoff: opts.backoff,
            state: if delayed {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            enqueued_at: now,
            earliest_run_at,
            reserved_at: None,
            finished_at: None,
            worker_id: None,
            result: None,
            failure: None,
        };
        self.save(&job).await?;

        if delayed {
            conn.zadd::<_, _, _, ()>(
                queue_key(queue, "delayed"),
                &job_id,
                earliest_run_at.timestamp_millis() as f64,
            )
            .await
            .map_err(store_err)?;
        } else {
            let seq = self.next_seq().await?;
            conn.zadd::<_, _, _, ()>(
                queue_key(queue, "waiting"),
                &job_id,
                waiting_score(opts.priority, seq),
            )
            .await
            .map_err(store_err)?;
        }
        Ok(job_id)
    }

    async fn reserve(&self, queue: QueueName, worker_id: &str) -> Result<Option<JobEnvelope>> {
        self.promote_due(queue).await?;

        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn
            .zpopmin(queue_key(queue, "waiting"), 1)
            .await
            .map_err(store_err)?;
        let Some((job_id, _)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let Some(mut job) = self.load(&job_id).await? else {
            // Envelope GC'd out from under its queue entry; nothing to run.
            return Ok(None);
        };
        let now = Utc::now();
        job.state = JobState::Active;
        job.attempt += 1;
        job.reserved_at = Some(now);
        job.worker_id = Some(worker_id.to_string());
        self.save(&job).await?;

        let expiry = now + self.tuning.visibility_lease;
        conn.zadd::<_, _, _, ()>(
            queue_key(queue, "active"),
            &job_id,
            expiry.timestamp_millis() as f64,
        )
        .await
        .map_err(store_err)?;
        Ok(Some(job))
    }

    async fn heartbeat(&self, job_id: &str) -> Result<()> {
        let Some(mut job) = self.load(job_id).await? else {
            return Err(Error::Store(format!("unknown job {}", job_id)));
        };
        if job.state != JobState::Active {
            return Err(Error::Store(format!("job {} is not active", job_id)));
        }
        let now = Utc::now();
        job.reserved_at = Some(now);
        self.save(&job).await?;

        let mut conn = self.conn.clone();
        let expiry = now + self.tuning.visibility_lease;
        conn.zadd::<_, _, _, ()>(
            queue_key(job.queue, "active"),
            job_id,
            expiry.timestamp_millis() as f64,
        )
        .await
        .map_err(store_err)
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let Some(mut job) = self.load(job_id).await? else {
            return Err(Error::Store(format!("unknown job {}", job_id)));
        };
        let now = Utc::now();
        job.state = JobState::Completed;
        job.finished_at = Some(now);
        job.worker_id = None;
        self.save(&job).await?;

        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(queue_key(job.queue, "active"), job_id)
            .await
            .map_err(store_err)?;
        conn.zadd::<_, _, _, ()>(
            queue_key(job.queue, "completed"),
            job_id,
            now.timestamp_millis() as f64,
        )
        .await
        .map_err(store_err)
    }

    async fn fail(&self, job_id: &str, reason: &str) -> Result<()> {
        let Some(mut job) = self.load(job_id).await? else {
            return Err(Error::Store(format!("unknown job {}", job_id)));
        };
        let now = Utc::now();
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(queue_key(job.queue, "active"), job_id)
            .await
            .map_err(store_err)?;

        job.failure = Some(reason.to_string());
        job.worker_id = None;

        if job.attempt < job.max_attempts {
            let delay = job.backoff.delay_for(job.attempt);
            job.state = JobState::Delayed;
            job.earliest_run_at = now + delay;
            job.reserved_at = None;
            self.save(&job).await?;
            debug!(
                job_id = %job_id,
                queue = job.queue.as_str(),
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                "Job failed, retrying with backoff"
            );
            conn.zadd::<_, _, _, ()>(
                queue_key(job.queue, "delayed"),
                job_id,
                job.earliest_run_at.timestamp_millis() as f64,
            )
            .await
            .map_err(store_err)
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(now);
            self.save(&job).await?;
            warn!(
                job_id = %job_id,
                queue = job.queue.as_str(),
                attempt = job.attempt,
                failure = reason,
                "Job exhausted retries, dead-lettering"
            );
            conn.zadd::<_, _, _, ()>(
                queue_key(job.queue, "failed"),
                job_id,
                now.timestamp_millis() as f64,
            )
            .await
            .map_err(store_err)?;
            self.push_dead_letter(&job, reason).await
        }
    }

    async fn discard(&self, job_id: &str, reason: &str) -> Result<()> {
        let Some(mut job) = self.load(job_id).await? else {
            return Err(Error::Store(format!("unknown job {}", job_id)));
        };
        let now = Utc::now();
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(queue_key(job.queue, "active"), job_id)
            .await
            .map_err(store_err)?;
        job.state = JobState::Failed;
        job.finished_at = Some(now);
        job.failure = Some(reason.to_string());
        job.worker_id = None;
        self.save(&job).await?;
        conn.zadd::<_, _, _, ()>(
            queue_key(job.queue, "failed"),
            job_id,
            now.timestamp_millis() as f64,
        )
        .await
        .map_err(store_err)
    }

    async fn release(&self, job_id: &str) -> Result<()> {
        let Some(mut job) = self.load(job_id).await? else {
            return Err(Error::Store(format!("unknown job {}", job_id)));
        };
        if job.state != JobState::Active {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(queue_key(job.queue, "active"), job_id)
            .await
            .map_err(store_err)?;

        job.state = JobState::Waiting;
        job.attempt = job.attempt.saturating_sub(1);
        job.reserved_at = None;
        job.worker_id = None;
        self.save(&job).await?;

        let seq = self.next_seq().await?;
        conn.zadd::<_, _, _, ()>(
            queue_key(job.queue, "waiting"),
            job_id,
            waiting_score(job.priority, seq),
        )
        .await
        .map_err(store_err)
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
        let entry = ScheduleEntry {
            name: name.to_string(),
            queue,
            payload,
            every,
            next_run: Utc::now() + every,
        };
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(schedules_key(), name, serde_json::to_string(&entry)?)
            .await
            .map_err(store_err)
    }

    async fn cancel_repeating(&self, name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(schedules_key(), name)
            .await
            .map_err(store_err)
    }

    async fn tick_schedules(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let all: Vec<(String, String)> = conn.hgetall(schedules_key()).await.map_err(store_err)?;

        let mut produced = 0;
        for (name, raw) in all {
            let Ok(mut entry) = serde_json::from_str::<ScheduleEntry>(&raw) else {
                warn!(schedule = %name, "Dropping unparsable schedule entry");
                conn.hdel::<_, _, ()>(schedules_key(), &name)
                    .await
                    .map_err(store_err)?;
                continue;
            };
            if entry.next_run > now {
                continue;
            }
            let fired_at = entry.next_run;
            while entry.next_run <= now {
                entry.next_run = entry.next_run + entry.every;
            }
            conn.hset::<_, _, _, ()>(schedules_key(), &name, serde_json::to_string(&entry)?)
                .await
                .map_err(store_err)?;

            // Idempotent id: concurrent tickers produce the job once.
            let job_id = format!("sched:{}:{}", entry.name, fired_at.timestamp());
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
        let mut touched = 0;
        for queue in QueueName::work_queues() {
            touched += self.expire_stalled_for(queue).await?;
        }
        Ok(touched)
    }

    async fn gc(&self) -> Result<u64> {
        let now = Utc::now();
        let completed_cutoff =
            (now - chrono::Duration::from_std(self.tuning.completed_retention).unwrap_or_default())
                .timestamp_millis();
        let failed_cutoff =
            (now - chrono::Duration::from_std(self.tuning.failed_retention).unwrap_or_default())
                .timestamp_millis();

        let mut removed = 0;
        for queue in QueueName::work_queues() {
            removed += self
                .gc_zset(
                    queue_key(queue, "completed"),
                    completed_cutoff,
                    Some(self.tuning.completed_retention_count),
                )
                .await?;
            removed += self
                .gc_zset(queue_key(queue, "failed"), failed_cutoff, None)
                .await?;
        }
        Ok(removed)
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts> {
        let mut conn = self.conn.clone();
        let waiting: i64 = conn
            .zcard(queue_key(queue, "waiting"))
            .await
            .map_err(store_err)?;
        let delayed: i64 = conn
            .zcard(queue_key(queue, "delayed"))
            .await
            .map_err(store_err)?;
        let active: i64 = conn
            .zcard(queue_key(queue, "active"))
            .await
            .map_err(store_err)?;
        let completed: i64 = conn
            .zcard(queue_key(queue, "completed"))
            .await
            .map_err(store_err)?;
        let failed: i64 = conn
            .zcard(queue_key(queue, "failed"))
            .await
            .map_err(store_err)?;
        Ok(QueueCounts {
            waiting,
            active,
            delayed,
            completed,
            failed,
        })
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobEnvelope>> {
        self.load(job_id).await
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(dlq_key(), 0, limit.saturating_sub(1) as isize)
            .await
            .map_err(store_err)?;
        raw.iter()
            .map(|r| serde_json::from_str(r).map_err(Into::into))
            .collect()
    }

    async fn requeue_dead_letter(&self, original_job_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(dlq_key(), 0, -1).await.map_err(store_err)?;
        for entry_raw in raw {
            let entry: DeadLetter = serde_json::from_str(&entry_raw)?;
            if entry.original_job_id != original_job_id {
                continue;
            }
            conn.lrem::<_, _, ()>(dlq_key(), 1, &entry_raw)
                .await
                .map_err(store_err)?;
            let new_id = self
                .enqueue(
                    entry.original_queue,
                    entry.payload,
                    EnqueueOptions::default(),
                )
                .await?;
            return Ok(Some(new_id));
        }
        Ok(None)
    }

    async fn purge(&self, queue: QueueName) -> Result<()> {
        let mut conn = self.conn.clone();
        for state in ["waiting", "delayed", "active", "completed", "failed"] {
            let key = queue_key(queue, state);
            let members: Vec<String> = conn.zrange(&key, 0, -1).await.map_err(store_err)?;
            for job_id in members {
                conn.del::<_, ()>(job_key(&job_id)).await.map_err(store_err)?;
            }
            conn.del::<_, ()>(&key).await.map_err(store_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_naming() {
        assert_eq!(job_key("abc"), "inlet:job:abc");
        assert_eq!(queue_key(QueueName::Media, "waiting"), "inlet:q:media:waiting");
        assert_eq!(dlq_key(), "inlet:dlq");
    }

    #[test]
    fn test_waiting_score_orders_priority_before_arrival() {
        // A later-arriving priority-1 job beats an earlier priority-2 job.
        assert!(waiting_score(1, 1_000_000) < waiting_score(2, 1));
        // Within a priority, earlier arrivals win.
        assert!(waiting_score(2, 1) < waiting_score(2, 2));
    }
}
