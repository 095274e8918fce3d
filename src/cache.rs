//! Cache-aside store.
//!
//! `CacheBackend` is the raw string-keyed collaborator (Redis in production,
//! an in-process map otherwise). `CacheAside` wraps it with namespacing,
//! JSON values, TTL jitter and negative markers, and swallows every backend
//! failure: an unreachable cache reads as a miss and writes become no-ops.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Stored in place of a value when the source of truth confirmed absence.
/// Never valid JSON, so it cannot collide with a serialized value.
const NEGATIVE_MARKER: &str = "!absent";

pub const DEFAULT_TTL_VARIANCE: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

pub struct RedisBackend {
    client: redis::Client,
    timeout: Duration,
}

impl RedisBackend {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client, timeout })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        timeout(self.timeout, op)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
            .map_err(CacheError::from)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        self.bounded(self.client.get_multiplexed_async_connection())
            .await
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.get::<_, Option<String>>(key)).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let secs = ttl.as_secs().max(1);
        self.bounded(conn.set_ex::<_, _, ()>(key, value, secs)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let removed: u64 = self.bounded(conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(500)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let count: u64 = self.bounded(conn.del(&keys)).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

/// Escapes the characters `SCAN MATCH` treats as glob syntax.
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// In-process backend used when no Redis is configured, and in tests.
/// Expired entries are dropped when read and swept on every write.
/// `None` as the deadline means the TTL overflowed the clock.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("memory backend offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires_at)) if is_live(*expires_at, Instant::now()) => {
                return Ok(Some(value.clone()));
            }
            Some(_) => {}
            None => return Ok(None),
        }
        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires_at)| is_live(*expires_at, now));
        entries.insert(key.to_string(), (value, now.checked_add(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_online()?;
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |deadline| deadline > now)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    /// A negative marker: the source of truth has no such entity.
    Absent,
    Miss,
}

/// `base ± uniform(variance)` in whole seconds, never below one second.
pub fn jittered_ttl<R: Rng>(base: Duration, variance: Duration, rng: &mut R) -> Duration {
    let spread = i64::try_from(variance.as_secs()).unwrap_or(i64::MAX);
    let jitter = if spread == 0 {
        0
    } else {
        rng.gen_range(-spread..=spread)
    };
    let base = i64::try_from(base.as_secs()).unwrap_or(i64::MAX);
    let secs = base.saturating_add(jitter).max(1);
    Duration::from_secs(secs.unsigned_abs())
}

#[derive(Clone)]
pub struct CacheAside {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    variance: Duration,
}

impl CacheAside {
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>, variance: Duration) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            variance,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn effective_ttl(&self, base_ttl: Duration) -> Duration {
        jittered_ttl(base_ttl, self.variance, &mut rand::thread_rng())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        let full_key = self.full_key(key);
        match self.backend.get(&full_key).await {
            Ok(Some(raw)) if raw == NEGATIVE_MARKER => CacheLookup::Absent,
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => CacheLookup::Hit(value),
                Err(err) => {
                    warn!(key = %full_key, error = %err, "discarding undecodable cache entry");
                    CacheLookup::Miss
                }
            },
            Ok(None) => CacheLookup::Miss,
            Err(err) => {
                warn!(key = %full_key, error = %err, "cache read failed, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    /// Returns whether the write landed. Failures are logged, never raised.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, base_ttl: Duration) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key, error = %err, "cache value could not be serialized");
                return false;
            }
        };
        self.write(key, payload, base_ttl).await
    }

    pub async fn set_absent(&self, key: &str, base_ttl: Duration) -> bool {
        self.write(key, NEGATIVE_MARKER.to_string(), base_ttl).await
    }

    async fn write(&self, key: &str, payload: String, base_ttl: Duration) -> bool {
        let full_key = self.full_key(key);
        let ttl = self.effective_ttl(base_ttl);
        match self.backend.set(&full_key, payload, ttl).await {
            Ok(()) => {
                debug!(key = %full_key, ttl_secs = ttl.as_secs(), "cache entry written");
                true
            }
            Err(err) => {
                warn!(key = %full_key, error = %err, "cache write failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let full_key = self.full_key(key);
        match self.backend.delete(&full_key).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(key = %full_key, error = %err, "cache delete failed");
                false
            }
        }
    }

    pub async fn delete_namespace(&self) -> bool {
        let prefix = format!("{}:", self.namespace);
        match self.backend.delete_prefix(&prefix).await {
            Ok(removed) => {
                debug!(namespace = %self.namespace, removed, "cache namespace flushed");
                true
            }
            Err(err) => {
                warn!(namespace = %self.namespace, error = %err, "cache namespace flush failed");
                false
            }
        }
    }
}
