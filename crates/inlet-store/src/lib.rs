//! # inlet-store
//!
//! Transient-state backends for the inlet pipeline: durable job queues with
//! retry/backoff/dead-letter semantics and repeatable schedules, the
//! deduplication seen-set, and per-source sliding-window rate limiting.
//!
//! Every concern is a trait with two implementations: an in-memory store for
//! tests and single-process runs, and a Redis store for production. The
//! pipeline holds trait objects and never knows which backend it is on.
//!
//! ## Example
//!
//! ```ignore
//! use inlet_store::{JobStore, MemoryJobStore};
//! use inlet_core::{EnqueueOptions, QueueName};
//!
//! let store = MemoryJobStore::new();
//! let job_id = store
//!     .enqueue(QueueName::Fetch, payload, EnqueueOptions::default())
//!     .await?;
//! let job = store.reserve(QueueName::Fetch, "worker-1").await?;
//! ```

pub mod dedup;
pub mod memory;
pub mod rate_limit;
pub mod redis_store;
pub mod store;

pub use dedup::{DedupCheck, DedupStore, MemoryDedupStore, RedisDedupStore};
pub use memory::MemoryJobStore;
pub use rate_limit::{
    MemoryRateLimiter, RateDecision, RateLimitRules, RateLimiter, RedisRateLimiter,
};
pub use redis_store::RedisJobStore;
pub use store::{JobStore, ScheduleEntry, StoreTuning};
