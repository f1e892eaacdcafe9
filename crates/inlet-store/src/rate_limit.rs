//! Sliding-window rate limiting per `(source_kind, source_id)`.
//!
//! Hit timestamps are kept in a sorted structure so the oldest entry governs
//! the reset time. Denials are surfaced with a structured counter field for
//! observability; the fetch stage treats them as empty-success, never as a
//! retryable failure.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use inlet_core::{new_v7, Error, RateLimitRule, Result, SourceKind};

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window (after this one, if consumed).
    pub remaining: u32,
    /// Milliseconds until the oldest hit leaves the window.
    pub reset_ms: u64,
}

/// Sliding-window admission control.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Inspect the window without recording a hit.
    async fn check(&self, kind: SourceKind, id: &str) -> Result<RateDecision>;

    /// Record a hit if the window allows it; a denial records nothing.
    async fn consume(&self, kind: SourceKind, id: &str) -> Result<RateDecision>;
}

/// Per-kind rules resolved at construction, with built-in defaults.
#[derive(Debug, Clone)]
pub struct RateLimitRules {
    overrides: HashMap<SourceKind, RateLimitRule>,
}

impl RateLimitRules {
    pub fn new(overrides: HashMap<SourceKind, RateLimitRule>) -> Self {
        Self { overrides }
    }

    pub fn defaults() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    pub fn rule_for(&self, kind: SourceKind) -> RateLimitRule {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| RateLimitRule::default_for(kind))
    }
}

/// In-process sliding window for tests and single-process runs.
pub struct MemoryRateLimiter {
    rules: RateLimitRules,
    windows: Mutex<HashMap<(SourceKind, String), VecDeque<Instant>>>,
}

impl MemoryRateLimiter {
    pub fn new(rules: RateLimitRules) -> Self {
        Self {
            rules,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn decide(
        hits: &mut VecDeque<Instant>,
        rule: RateLimitRule,
        now: Instant,
        consume: bool,
    ) -> RateDecision {
        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) >= rule.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        let used = hits.len() as u32;
        if used < rule.max_requests {
            if consume {
                hits.push_back(now);
            }
            let used_after = if consume { used + 1 } else { used };
            let reset_ms = hits
                .front()
                .map(|oldest| {
                    rule.window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_millis() as u64
                })
                .unwrap_or(0);
            RateDecision {
                allowed: true,
                remaining: rule.max_requests - used_after,
                reset_ms,
            }
        } else {
            let reset_ms = hits
                .front()
                .map(|oldest| {
                    rule.window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_millis() as u64
                })
                .unwrap_or(0);
            RateDecision {
                allowed: false,
                remaining: 0,
                reset_ms,
            }
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, kind: SourceKind, id: &str) -> Result<RateDecision> {
        let rule = self.rules.rule_for(kind);
        let mut windows = self.windows.lock().expect("rate-limit mutex poisoned");
        let hits = windows.entry((kind, id.to_string())).or_default();
        Ok(Self::decide(hits, rule, Instant::now(), false))
    }

    async fn consume(&self, kind: SourceKind, id: &str) -> Result<RateDecision> {
        let rule = self.rules.rule_for(kind);
        let decision = {
            let mut windows = self.windows.lock().expect("rate-limit mutex poisoned");
            let hits = windows.entry((kind, id.to_string())).or_default();
            Self::decide(hits, rule, Instant::now(), true)
        };
        if !decision.allowed {
            debug!(
                rate_limited = 1,
                source_kind = kind.as_str(),
                source_id = id,
                reset_ms = decision.reset_ms,
                "Rate limit denied request"
            );
        }
        Ok(decision)
    }
}

/// Redis ZSET-backed sliding window shared across processes.
///
/// Members are unique per hit; scores are millisecond timestamps, so the
/// lowest-scored member is the oldest hit and governs the reset.
pub struct RedisRateLimiter {
    rules: RateLimitRules,
    conn: ConnectionManager,
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager, rules: RateLimitRules) -> Self {
        Self { rules, conn }
    }

    fn window_key(kind: SourceKind, id: &str) -> String {
        format!("inlet:rl:{}:{}", kind.as_str(), id)
    }

    async fn decide(&self, kind: SourceKind, id: &str, consume: bool) -> Result<RateDecision> {
        let rule = self.rules.rule_for(kind);
        let key = Self::window_key(kind, id);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = rule.window.as_millis() as i64;
        let mut conn = self.conn.clone();

        conn.zrembyscore::<_, _, _, ()>(&key, f64::MIN, (now_ms - window_ms) as f64)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let used: u32 = conn
            .zcard(&key)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let oldest: Vec<(String, f64)> = conn
            .zrange_withscores(&key, 0, 0)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let reset_ms = oldest
            .first()
            .map(|(_, score)| ((*score as i64 + window_ms) - now_ms).max(0) as u64)
            .unwrap_or(0);

        if used >= rule.max_requests {
            debug!(
                rate_limited = 1,
                source_kind = kind.as_str(),
                source_id = id,
                reset_ms,
                "Rate limit denied request"
            );
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
                reset_ms,
            });
        }

        let used_after = if consume {
            conn.zadd::<_, _, _, ()>(&key, new_v7().to_string(), now_ms as f64)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
            conn.expire::<_, ()>(&key, rule.window.as_secs().max(1) as i64)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
            used + 1
        } else {
            used
        };

        Ok(RateDecision {
            allowed: true,
            remaining: rule.max_requests - used_after,
            reset_ms,
        })
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, kind: SourceKind, id: &str) -> Result<RateDecision> {
        self.decide(kind, id, false).await
    }

    async fn consume(&self, kind: SourceKind, id: &str) -> Result<RateDecision> {
        self.decide(kind, id, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_rules(max: u32, window: Duration) -> RateLimitRules {
        let mut overrides = HashMap::new();
        for kind in SourceKind::all() {
            overrides.insert(kind, RateLimitRule::new(max, window));
        }
        RateLimitRules::new(overrides)
    }

    #[tokio::test]
    async fn test_n_consumes_allowed_then_denied() {
        let limiter = MemoryRateLimiter::new(tight_rules(3, Duration::from_secs(60)));

        for i in 0..3u32 {
            let d = limiter.consume(SourceKind::Feed, "src-1").await.unwrap();
            assert!(d.allowed, "consume {} should be allowed", i);
            assert_eq!(d.remaining, 2 - i);
        }

        let denied = limiter.consume(SourceKind::Feed, "src-1").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.reset_ms <= 60_000);
        assert!(denied.reset_ms > 0);
    }

    #[tokio::test]
    async fn test_check_does_not_record_hits() {
        let limiter = MemoryRateLimiter::new(tight_rules(2, Duration::from_secs(60)));
        for _ in 0..5 {
            let d = limiter.check(SourceKind::Forum, "src-2").await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, 2);
        }
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = MemoryRateLimiter::new(tight_rules(1, Duration::from_millis(30)));
        assert!(limiter.consume(SourceKind::Feed, "s").await.unwrap().allowed);
        assert!(!limiter.consume(SourceKind::Feed, "s").await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.consume(SourceKind::Feed, "s").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_sources_are_isolated() {
        let limiter = MemoryRateLimiter::new(tight_rules(1, Duration::from_secs(60)));
        assert!(limiter.consume(SourceKind::Feed, "a").await.unwrap().allowed);
        assert!(limiter.consume(SourceKind::Feed, "b").await.unwrap().allowed);
        assert!(
            limiter
                .consume(SourceKind::Microblog, "a")
                .await
                .unwrap()
                .allowed,
            "kinds are part of the key"
        );
        assert!(!limiter.consume(SourceKind::Feed, "a").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_denial_does_not_consume() {
        let limiter = MemoryRateLimiter::new(tight_rules(1, Duration::from_millis(50)));
        assert!(limiter.consume(SourceKind::Feed, "s").await.unwrap().allowed);
        for _ in 0..10 {
            assert!(!limiter.consume(SourceKind::Feed, "s").await.unwrap().allowed);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Only the one recorded hit had to expire.
        assert!(limiter.consume(SourceKind::Feed, "s").await.unwrap().allowed);
    }

    #[test]
    fn test_default_rules_match_kind_table() {
        let rules = RateLimitRules::defaults();
        assert_eq!(rules.rule_for(SourceKind::Feed).max_requests, 60);
        assert_eq!(rules.rule_for(SourceKind::VideoChannel).max_requests, 100);
        assert_eq!(
            rules.rule_for(SourceKind::Microblog).window,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_redis_window_key() {
        assert_eq!(
            RedisRateLimiter::window_key(SourceKind::Microblog, "acct-9"),
            "inlet:rl:microblog:acct-9"
        );
    }
}
