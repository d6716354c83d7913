//! Narrow keyed-store interface for per-user process state.
//!
//! Conversation sessions and running jobs both live behind [`KeyedStore`], so
//! the in-memory [`MemoryStore`] can be replaced by an external keyed store
//! without touching the conversation engine or the job coordinator.

use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

#[async_trait]
pub trait KeyedStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V>;

    async fn set(&self, key: &str, value: V);

    /// Remove the entry, returning what was stored.
    async fn delete(&self, key: &str) -> Option<V>;

    /// Atomically claim `key`. Returns `false` (and stores nothing) when an
    /// entry already exists.
    async fn insert_if_absent(&self, key: &str, value: V) -> bool;
}

/// moka-backed store. Entries optionally expire after a period without access.
#[derive(Clone)]
pub struct MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<String, V>,
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    const CAPACITY: u64 = 100_000;

    /// No eviction other than explicit `delete`.
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().max_capacity(Self::CAPACITY).build(),
        }
    }

    /// Entries untouched for `ttl` are evicted (abandoned conversations).
    pub fn with_idle_ttl(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(Self::CAPACITY)
                .time_to_idle(ttl)
                .build(),
        }
    }
}

impl<V> Default for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> KeyedStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key).await
    }

    async fn set(&self, key: &str, value: V) {
        self.cache.insert(key.to_string(), value).await;
    }

    async fn delete(&self, key: &str) -> Option<V> {
        self.cache.remove(key).await
    }

    async fn insert_if_absent(&self, key: &str, value: V) -> bool {
        self.cache
            .entry(key.to_string())
            .or_insert_with(async move { value })
            .await
            .is_fresh()
    }
}
