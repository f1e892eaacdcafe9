//! Job handler contract shared by all stage workers.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use inlet_core::{Error, JobEnvelope, QueueName};

/// Context handed to a stage handler for one job.
pub struct JobContext {
    /// The reserved envelope being processed.
    pub job: JobEnvelope,
    /// Cancelled on shutdown; handlers check it at every suspension point.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job: JobEnvelope, cancel: CancellationToken) -> Self {
        Self { job, cancel }
    }

    /// Decode the payload into the stage's job type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> inlet_core::Result<T> {
        self.job.decode()
    }

    /// Error to return when the cancellation token fired.
    pub fn cancelled_err(&self) -> Error {
        Error::Cancelled(format!("job {} cancelled by shutdown", self.job.job_id))
    }
}

/// Outcome of one job execution, mapped onto store transitions by the
/// worker: complete, fail (retry/DLQ), discard, or release back to waiting.
#[derive(Debug)]
pub enum JobOutcome {
    /// Terminal success with an optional result payload for inspection.
    Success(Option<JsonValue>),
    /// Transient failure: the store re-queues with backoff, then
    /// dead-letters once attempts are exhausted.
    Retry(String),
    /// Permanent failure already reflected on the content item; the job is
    /// discarded without further retries.
    Discard(String),
    /// Shutdown arrived mid-job; the envelope returns to WAITING untouched.
    Cancelled,
}

impl JobOutcome {
    /// Map a stage error onto an outcome using the error taxonomy.
    pub fn from_error(error: Error) -> Self {
        match error {
            Error::Cancelled(_) => JobOutcome::Cancelled,
            e if e.is_retryable() => JobOutcome::Retry(e.to_string()),
            e => JobOutcome::Discard(e.to_string()),
        }
    }
}

/// A stage worker's job processor.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The queue this handler serves.
    fn queue(&self) -> QueueName;

    async fn execute(&self, ctx: JobContext) -> JobOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_error_mapping() {
        assert!(matches!(
            JobOutcome::from_error(Error::Cancelled("bye".into())),
            JobOutcome::Cancelled
        ));
        assert!(matches!(
            JobOutcome::from_error(Error::UpstreamUnavailable("503".into())),
            JobOutcome::Retry(_)
        ));
        assert!(matches!(
            JobOutcome::from_error(Error::CircuitOpen("cms".into())),
            JobOutcome::Retry(_)
        ));
        assert!(matches!(
            JobOutcome::from_error(Error::ResourceExhausted("too big".into())),
            JobOutcome::Discard(_)
        ));
        assert!(matches!(
            JobOutcome::from_error(Error::UpstreamRejected("422".into())),
            JobOutcome::Discard(_)
        ));
    }
}
