//! Short-term seen-set backing deduplication.
//!
//! Best-effort: it reduces collaborator calls, but the collaborator remains
//! the authority on uniqueness via the idempotency key it receives.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use inlet_core::{Error, Result};

/// Result of a dedup lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupCheck {
    pub duplicate: bool,
    /// Content id recorded with the prior sighting, when known.
    pub prior_id: Option<String>,
}

impl DedupCheck {
    pub fn miss() -> Self {
        Self {
            duplicate: false,
            prior_id: None,
        }
    }
}

/// Seen-set keyed by idempotency key with per-entry TTL.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn check(&self, key: &str) -> Result<DedupCheck>;
    async fn mark(&self, key: &str, content_id: &str, ttl: Duration) -> Result<()>;
}

/// In-process seen-set for tests and single-process runs.
pub struct MemoryDedupStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn check(&self, key: &str) -> Result<DedupCheck> {
        let mut entries = self.entries.lock().expect("dedup mutex poisoned");
        match entries.get(key) {
            Some((content_id, expires)) if *expires > Instant::now() => Ok(DedupCheck {
                duplicate: true,
                prior_id: Some(content_id.clone()),
            }),
            Some(_) => {
                entries.remove(key);
                Ok(DedupCheck::miss())
            }
            None => Ok(DedupCheck::miss()),
        }
    }

    async fn mark(&self, key: &str, content_id: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("dedup mutex poisoned");
        entries.insert(
            key.to_string(),
            (content_id.to_string(), Instant::now() + ttl),
        );
        Ok(())
    }
}

/// Redis-backed seen-set shared by all pipeline processes.
pub struct RedisDedupStore {
    conn: ConnectionManager,
}

impl RedisDedupStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn entry_key(key: &str) -> String {
        format!("inlet:dedup:{}", key)
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn check(&self, key: &str) -> Result<DedupCheck> {
        let mut conn = self.conn.clone();
        let prior: Option<String> = conn
            .get(Self::entry_key(key))
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(match prior {
            Some(content_id) => DedupCheck {
                duplicate: true,
                prior_id: Some(content_id),
            },
            None => DedupCheck::miss(),
        })
    }

    async fn mark(&self, key: &str, content_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::entry_key(key), content_id, ttl.as_secs())
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }
}
