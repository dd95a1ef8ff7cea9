//! Process-local TTL cache for remote fetches.
//!
//! A cache is an ordinary value owned by whoever builds it; there is no
//! global instance. Values are shared as `Arc<V>`, so a hit hands back the
//! very object that was stored. Errors are never cached. Two concurrent
//! misses on one key may both fetch; the later insert wins.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::trace;

/// TTL used by the dashboard for remote fetches
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry<V> {
    value: Arc<V>,
    inserted_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) < self.ttl
    }

    /// Cached value for `key` unless it has expired. An expired entry is
    /// removed.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if self.is_fresh(entry, now) => return Some(entry.value.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Another writer may have refreshed it since the read lock dropped
        if entries
            .get(key)
            .is_some_and(|entry| !self.is_fresh(entry, now))
        {
            entries.remove(key);
        }
        None
    }

    /// Store a completed value, replacing any previous entry. Expired
    /// entries for other keys are dropped on the way.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) < self.ttl);
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                inserted_at: now,
            },
        );
        value
    }

    /// Return the cached value or run `fetch` and cache its success.
    ///
    /// No lock is held while `fetch` runs.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key) {
            trace!("cache hit");
            return Ok(hit);
        }
        trace!("cache miss");
        let value = fetch().await?;
        Ok(self.insert(key, value))
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) < self.ttl);
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet dropped
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fetch function's cache: the key is built from the call arguments by
/// `key_fn`, which never sees the client handle doing the fetch.
pub struct CachedFetch<A, K, V> {
    cache: TtlCache<K, V>,
    key_fn: Box<dyn Fn(&A) -> K + Send + Sync>,
}

impl<A, K, V> CachedFetch<A, K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration, key_fn: impl Fn(&A) -> K + Send + Sync + 'static) -> Self {
        Self {
            cache: TtlCache::new(ttl),
            key_fn: Box::new(key_fn),
        }
    }

    pub async fn fetch<F, Fut, E>(&self, args: &A, fetch: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = (self.key_fn)(args);
        self.cache.get_or_try_insert_with(key, fetch).await
    }

    pub fn cache(&self) -> &TtlCache<K, V> {
        &self.cache
    }
}
