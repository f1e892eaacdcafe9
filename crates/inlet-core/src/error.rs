//! Error types for the inlet pipeline.

use thiserror::Error;

/// Result type alias using inlet's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pipeline operations.
///
/// Variants map to distinct handling policies: configuration errors abort
/// startup, upstream outages are routed through circuit breakers and job
/// retries, item-level errors are absorbed into batch counters.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration; fail fast at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dependency could not be reached or returned a server-side failure.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A collaborator rejected the request (4xx); not retried.
    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    /// Local or upstream throttling; the caller backs off via the window.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Malformed source item; skipped and counted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A circuit breaker is open for the named dependency.
    #[error("Circuit open for dependency: {0}")]
    CircuitOpen(String),

    /// A download or transcode exceeded its configured cap.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Cooperative cancellation during shutdown.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Queue/cache store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything unexpected; the job store retries, then dead-letters.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure implies a dependency outage and should count
    /// against a circuit breaker. Client-side errors never trip a breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_) | Error::Io(_) | Error::Internal(_)
        )
    }

    /// Whether the job store should retry a job that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_)
                | Error::CircuitOpen(_)
                | Error::Store(_)
                | Error::Io(_)
                | Error::Internal(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::UpstreamUnavailable(e.to_string())
        } else if let Some(status) = e.status() {
            if status.is_client_error() {
                Error::UpstreamRejected(e.to_string())
            } else {
                Error::UpstreamUnavailable(e.to_string())
            }
        } else {
            Error::UpstreamUnavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing INLET_CMS_BASE_URL".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing INLET_CMS_BASE_URL"
        );
    }

    #[test]
    fn test_error_display_circuit_open() {
        let err = Error::CircuitOpen("cms".to_string());
        assert_eq!(err.to_string(), "Circuit open for dependency: cms");
    }

    #[test]
    fn test_error_display_rate_limited() {
        let err = Error::RateLimited("feed/abc".to_string());
        assert_eq!(err.to_string(), "Rate limited: feed/abc");
    }

    #[test]
    fn test_trips_breaker_classification() {
        assert!(Error::UpstreamUnavailable("503".into()).trips_breaker());
        assert!(Error::Internal("boom".into()).trips_breaker());
        assert!(!Error::UpstreamRejected("400".into()).trips_breaker());
        assert!(!Error::RateLimited("window".into()).trips_breaker());
        assert!(!Error::Cancelled("shutdown".into()).trips_breaker());
        assert!(!Error::InvalidData("no title".into()).trips_breaker());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::UpstreamUnavailable("timeout".into()).is_retryable());
        assert!(Error::CircuitOpen("cms".into()).is_retryable());
        assert!(Error::Store("conn reset".into()).is_retryable());
        assert!(!Error::UpstreamRejected("422".into()).is_retryable());
        assert!(!Error::InvalidData("bad item".into()).is_retryable());
        assert!(!Error::Config("missing key".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
