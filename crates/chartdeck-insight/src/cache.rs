//! Concurrent cache with an explicit expiry and capacity policy.
//!
//! Entries are kept in a [`DashMap`], so lookups from many tasks do not
//! contend on a single lock. The first successful write for a key wins:
//! concurrent misses may each compute a value, but only one is stored and
//! every caller gets that one back.
//!
//! Expired entries are removed when read. When the cache is full, the
//! least recently inserted entry is evicted to make room.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Expiry and capacity limits. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
    pub max_entries: Option<usize>,
}

impl CachePolicy {
    /// Entries live for the process lifetime.
    pub fn unbounded() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    /// Insertion order, for capacity eviction.
    seq: u64,
}

pub struct PolicyCache<V> {
    entries: DashMap<String, Entry<V>>,
    policy: CachePolicy,
    next_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> PolicyCache<V> {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            next_seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.policy
            .ttl
            .is_some_and(|ttl| entry.inserted_at.elapsed() > ttl)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if !self.is_expired(&entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired && self.entries.remove_if(key, |_, e| self.is_expired(e)).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` unless a live entry exists. Returns the stored value.
    pub fn insert(&self, key: &str, value: V) -> V {
        if self.entries.remove_if(key, |_, e| self.is_expired(e)).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(max) = self.policy.max_entries {
            while !self.entries.contains_key(key) && self.entries.len() >= max.max(1) {
                if !self.evict_oldest() {
                    break;
                }
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value,
                inserted_at: Instant::now(),
                seq,
            })
            .value
            .clone()
    }

    /// Return the cached value, or run `fetch` and cache its success.
    ///
    /// No lock is held while `fetch` runs. Errors are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fetch().await?;
        Ok(self.insert(key, value))
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.seq)
            .map(|entry| entry.key().clone());
        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache entry evicted at capacity");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn first_write_wins() {
        let cache = PolicyCache::new(CachePolicy::unbounded());
        assert_eq!(cache.insert("svc", "img-a".to_string()), "img-a");
        assert_eq!(cache.insert("svc", "img-b".to_string()), "img-a");
        assert_eq!(cache.get("svc").as_deref(), Some("img-a"));
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = PolicyCache::new(CachePolicy {
            ttl: Some(Duration::from_millis(1)),
            max_entries: None,
        });
        cache.insert("k", 1u32);
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.insert("k", 2), 2);
    }

    #[test]
    fn capacity_evicts_least_recently_inserted() {
        let cache = PolicyCache::new(CachePolicy {
            ttl: None,
            max_entries: Some(2),
        });
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.get("a");
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: PolicyCache<String> = PolicyCache::new(CachePolicy::unbounded());
        let calls = AtomicUsize::new(0);

        let first: Result<String, &str> = cache
            .get_or_try_insert_with("svc", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("registry down")
            })
            .await;
        assert!(first.is_err());

        let second: Result<String, &str> = cache
            .get_or_try_insert_with("svc", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("img".to_string())
            })
            .await;
        assert_eq!(second.unwrap(), "img");

        let third: Result<String, &str> = cache
            .get_or_try_insert_with("svc", || async { Ok("other".to_string()) })
            .await;
        assert_eq!(third.unwrap(), "img");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_agree_on_one_value() {
        let cache = Arc::new(PolicyCache::<usize>::new(CachePolicy::unbounded()));
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_try_insert_with("key", || async move {
                        tokio::task::yield_now().await;
                        Ok::<_, ()>(i)
                    })
                    .await
                    .unwrap()
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        let stored = cache.get("key").unwrap();
        assert!(seen.iter().all(|v| *v == stored));
    }
}
