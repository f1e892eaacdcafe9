//! # inlet-core
//!
//! Shared foundation for the inlet content ingestion pipeline: the data
//! model (sources, raw items, canonical records), queue payload types, the
//! error taxonomy, configuration loading, structured logging fields, and the
//! in-process resilience primitives (circuit breakers, idempotency keys).

pub mod breaker;
pub mod config;
pub mod defaults;
pub mod error;
pub mod idempotency;
pub mod jobs;
pub mod logging;
pub mod models;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker, Dependency};
pub use config::{Config, ConcurrencyConfig, ObjectStoreConfig, RateLimitRule};
pub use error::{Error, Result};
pub use jobs::{
    BackoffPolicy, DeadLetter, EnqueueOptions, EnrichmentJob, EnrichmentOperation, FetchJob,
    JobEnvelope, JobState, MediaJob, MediaOperation, NormalizeJob, QueueCounts, QueueName,
    TextFields, TriggeredBy,
};
pub use models::{
    CanonicalItem, ContentStatus, ContentType, EngagementStats, ModerationDecision, RawItem,
    SourceDescriptor, SourceFilters, SourceKind, SourceSettings,
};

/// Generate a new time-ordered UUIDv7 identifier.
///
/// UUIDv7 embeds a millisecond Unix timestamp in the first 48 bits, so ids
/// sort chronologically, which suits job ids and request correlation.
#[inline]
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_time_ordered() {
        let a = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_v7();
        assert!(a < b);
    }
}
