//! Circuit breakers isolating each external dependency.
//!
//! One breaker per dependency, registered at startup. State transitions are
//! evaluated on `execute` only (no background timer), and the state mutex is
//! never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// External dependencies guarded by breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    Cms,
    ObjectStore,
    Transcriber,
    VideoChannelApi,
    ForumApi,
    MicroblogApi,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Cms => "cms",
            Dependency::ObjectStore => "object_store",
            Dependency::Transcriber => "transcriber",
            Dependency::VideoChannelApi => "video_channel_api",
            Dependency::ForumApi => "forum_api",
            Dependency::MicroblogApi => "microblog_api",
        }
    }

    pub fn all() -> [Dependency; 6] {
        [
            Dependency::Cms,
            Dependency::ObjectStore,
            Dependency::Transcriber,
            Dependency::VideoChannelApi,
            Dependency::ForumApi,
            Dependency::MicroblogApi,
        ]
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: crate::defaults::BREAKER_FAILURE_THRESHOLD,
            reset_timeout: crate::defaults::BREAKER_RESET_TIMEOUT,
            half_open_probes: crate::defaults::BREAKER_HALF_OPEN_PROBES,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

enum State {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32, probing: bool },
}

enum Admission {
    Call,
    Probe,
    Reject,
}

/// How a guarded call reflects on the dependency's availability.
enum Outcome {
    /// The dependency answered (including 4xx rejections).
    Success,
    /// The dependency is unreachable or failing server-side.
    Outage,
    /// Cancelled or locally throttled; no signal either way.
    Neutral,
}

impl Outcome {
    fn classify<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) if e.trips_breaker() => Outcome::Outage,
            Err(Error::Cancelled(_)) | Err(Error::RateLimited(_)) | Err(Error::CircuitOpen(_)) => {
                Outcome::Neutral
            }
            Err(_) => Outcome::Success,
        }
    }
}

/// Per-dependency failure isolation.
pub struct CircuitBreaker {
    dependency: Dependency,
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(dependency: Dependency, config: BreakerConfig) -> Self {
        Self {
            dependency,
            config,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    /// Current state, transitioning OPEN → HALF_OPEN if the reset timeout
    /// has elapsed (poll-on-read, same policy as `execute`).
    pub fn state(&self) -> BreakerState {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        self.poll_reset(&mut state);
        match *state {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    fn poll_reset(&self, state: &mut State) {
        if let State::Open { since } = *state {
            if since.elapsed() >= self.config.reset_timeout {
                debug!(
                    dependency = self.dependency.as_str(),
                    breaker_state = "half_open",
                    "Breaker reset timeout elapsed, allowing probes"
                );
                *state = State::HalfOpen {
                    successes: 0,
                    probing: false,
                };
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        self.poll_reset(&mut state);
        match *state {
            State::Closed { .. } => Admission::Call,
            State::Open { .. } => Admission::Reject,
            State::HalfOpen { probing, successes } => {
                if probing {
                    // One probe in flight at a time; others fast-fail.
                    Admission::Reject
                } else {
                    *state = State::HalfOpen {
                        successes,
                        probing: true,
                    };
                    Admission::Probe
                }
            }
        }
    }

    fn record(&self, probe: bool, outcome: Outcome) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        if let Outcome::Neutral = outcome {
            // Cancellation or local throttling says nothing about the
            // dependency; release the probe slot without counting it.
            if probe {
                if let State::HalfOpen { successes, .. } = *state {
                    *state = State::HalfOpen {
                        successes,
                        probing: false,
                    };
                }
            }
            return;
        }
        if matches!(outcome, Outcome::Outage) {
            let open = State::Open {
                since: Instant::now(),
            };
            match *state {
                State::Closed { failures } => {
                    let failures = failures + 1;
                    if failures >= self.config.failure_threshold {
                        warn!(
                            dependency = self.dependency.as_str(),
                            breaker_state = "open",
                            failures,
                            "Breaker opened"
                        );
                        *state = open;
                    } else {
                        *state = State::Closed { failures };
                    }
                }
                State::HalfOpen { .. } => {
                    warn!(
                        dependency = self.dependency.as_str(),
                        breaker_state = "open",
                        "Probe failed, breaker re-opened"
                    );
                    *state = open;
                }
                State::Open { .. } => {}
            }
        } else {
            match *state {
                State::Closed { .. } => *state = State::Closed { failures: 0 },
                State::HalfOpen { successes, .. } if probe => {
                    let successes = successes + 1;
                    if successes >= self.config.half_open_probes {
                        debug!(
                            dependency = self.dependency.as_str(),
                            breaker_state = "closed",
                            "Breaker closed after successful probes"
                        );
                        *state = State::Closed { failures: 0 };
                    } else {
                        *state = State::HalfOpen {
                            successes,
                            probing: false,
                        };
                    }
                }
                _ => {}
            }
        }
    }

    /// Run `f` under the breaker.
    ///
    /// Returns `Error::CircuitOpen` without calling `f` when the circuit is
    /// open and no probe slot is available. Only failures implying a
    /// dependency outage (`Error::trips_breaker`) count against the breaker;
    /// rejections and cancellations pass through untouched.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let probe = match self.admit() {
            Admission::Call => false,
            Admission::Probe => true,
            Admission::Reject => {
                return Err(Error::CircuitOpen(self.dependency.as_str().to_string()))
            }
        };

        let result = f().await;
        self.record(probe, Outcome::classify(&result));
        result
    }
}

/// Registry of all breakers, created once at startup.
#[derive(Clone)]
pub struct BreakerRegistry {
    breakers: Arc<HashMap<Dependency, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        let breakers = Dependency::all()
            .into_iter()
            .map(|dep| (dep, Arc::new(CircuitBreaker::new(dep, config))))
            .collect();
        Self {
            breakers: Arc::new(breakers),
        }
    }

    pub fn get(&self, dependency: Dependency) -> Arc<CircuitBreaker> {
        self.breakers
            .get(&dependency)
            .expect("all dependencies registered at construction")
            .clone()
    }

    /// Snapshot of every breaker's state for the health probe.
    pub fn states(&self) -> HashMap<Dependency, BreakerState> {
        self.breakers
            .iter()
            .map(|(dep, breaker)| (*dep, breaker.state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(50),
            half_open_probes: 3,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .execute(|| async { Err(Error::UpstreamUnavailable("503".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32> {
        breaker.execute(|| async { Ok(42) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(Dependency::Cms, fast_config());
        for _ in 0..4 {
            let _ = fail(&breaker).await;
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_open_fast_fails_without_calling() {
        let breaker = CircuitBreaker::new(Dependency::Cms, fast_config());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }

        let called = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute(|| {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;
        assert!(matches!(result, Err(Error::CircuitOpen(_))));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(Dependency::Cms, fast_config());
        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        succeed(&breaker).await.unwrap();
        // Four more failures do not open: the count restarted.
        for _ in 0..4 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_half_open_after_reset_then_closes_on_probes() {
        let breaker = CircuitBreaker::new(Dependency::Transcriber, fast_config());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        for _ in 0..2 {
            succeed(&breaker).await.unwrap();
            assert_eq!(breaker.state(), BreakerState::HalfOpen);
        }
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(Dependency::ForumApi, fast_config());
        for _ in 0..5 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_rejection_does_not_trip() {
        let breaker = CircuitBreaker::new(Dependency::Cms, fast_config());
        for _ in 0..10 {
            let result: Result<()> = breaker
                .execute(|| async { Err(Error::UpstreamRejected("422".into())) })
                .await;
            assert!(matches!(result, Err(Error::UpstreamRejected(_))));
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_registry_holds_all_dependencies() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        for dep in Dependency::all() {
            assert_eq!(registry.get(dep).state(), BreakerState::Closed);
        }
        assert_eq!(registry.states().len(), 6);
    }
}
