//! The key/value abstraction both the result cache and the rate limiter sit on
//! top of, per `spec.md` §4.5 ("backed by a remote key/value store accessed
//! through a storage adapter so it can also serve as the backing store for the
//! rate limiter"). `RedisBackend` is the production implementation; tests
//! substitute `InMemoryBackend`, the same swap-real-IO-for-a-double idiom the
//! teacher's `redis_store_test.rs` uses via a mock connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cdn_edge_error::{make_err, Code, Error};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Atomically increments `key` and, on the first increment, sets it to
    /// expire after `window`. Returns the post-increment count.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, Error>;

    async fn flush_all(&self) -> Result<(), Error>;
}

/// Lazily-connected Redis backend, mirroring the teacher's `LazyConnection`
/// pattern of deferring the first connection attempt until it is actually
/// needed rather than failing construction.
pub struct RedisBackend {
    url: String,
    connection: OnceCell<ConnectionManager>,
}

impl RedisBackend {
    pub fn new(url: impl Into<String>) -> Self {
        RedisBackend {
            url: url.into(),
            connection: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, Error> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let client = redis::Client::open(self.url.as_str())
                    .map_err(|e| make_err!(Code::Internal, "invalid redis url: {e}"))?;
                client
                    .get_connection_manager()
                    .await
                    .map_err(|e| make_err!(Code::Unavailable, "failed to connect to redis: {e}"))
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|e| make_err!(Code::Unavailable, "redis GET {key} failed: {e}"))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|e| make_err!(Code::Unavailable, "redis SETEX {key} failed: {e}"))
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| make_err!(Code::Unavailable, "redis DEL {key} failed: {e}"))
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, Error> {
        let mut conn = self.connection().await?;
        let count: u64 = conn
            .incr(key, 1u64)
            .await
            .map_err(|e| make_err!(Code::Unavailable, "redis INCR {key} failed: {e}"))?;
        if count == 1 {
            let _: () = conn
                .expire(key, window.as_secs().max(1) as i64)
                .await
                .map_err(|e| make_err!(Code::Unavailable, "redis EXPIRE {key} failed: {e}"))?;
        }
        Ok(count)
    }

    async fn flush_all(&self) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| make_err!(Code::Unavailable, "redis FLUSHDB failed: {e}"))
    }
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// An in-process stand-in for `RedisBackend`, used by `ResultCache`/`RateLimiter`
/// unit tests so they don't require a live Redis instance.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, Error> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let expired = entries.get(key).map(|e| e.expires_at <= now).unwrap_or(true);
        if expired {
            entries.insert(
                key.to_string(),
                Entry {
                    value: 1u64.to_le_bytes().to_vec(),
                    expires_at: now + window,
                },
            );
            return Ok(1);
        }
        let entry = entries.get_mut(key).expect("checked present above");
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&entry.value);
        let count = u64::from_le_bytes(bytes) + 1;
        entry.value = count.to_le_bytes().to_vec();
        Ok(count)
    }

    async fn flush_all(&self) -> Result<(), Error> {
        self.entries.lock().clear();
        Ok(())
    }
}
