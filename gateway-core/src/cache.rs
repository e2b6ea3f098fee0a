//! Generic single-flight, TTL-expiring cache used for both the per-adapter
//! token cache and the per-account session cache. A single refresh/create
//! is in flight per key at any time;
//! other concurrent callers await its result instead of issuing their own
//! RPC. Expired entries are lazily evicted by the next
//! successful write.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct CoalescingCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K, V> Default for CoalescingCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CoalescingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn fresh(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value.clone())
            } else {
                None
            }
        })
    }

    /// Returns the cached value if still fresh; otherwise runs `produce`
    /// exactly once per key even under concurrent callers, caching the
    /// result for `ttl`.
    pub async fn get_or_produce<E, F, Fut>(&self, key: K, produce: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(V, Duration), E>>,
    {
        if let Some(v) = self.fresh(&key) {
            return Ok(v);
        }
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if let Some(v) = self.fresh(&key) {
            return Ok(v);
        }
        let (value, ttl) = produce().await?;
        self.entries.insert(
            key,
            Entry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(value)
    }

    /// Evicts a key, e.g. on `AuthExpired` so the next call re-refreshes.
    pub fn evict(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Overwrites a key's value/TTL directly, used when a refresh rotates an
    /// identifier that must itself be re-keyed (GLM's refresh-token rotation).
    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn concurrent_callers_for_the_same_key_trigger_one_refresh() {
        let cache: Arc<CoalescingCache<String, String>> = Arc::new(CoalescingCache::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_produce::<String, _, _>("k".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(("token".to_string(), Duration::from_secs(60)))
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "token");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eviction_forces_a_fresh_produce() {
        let cache: CoalescingCache<String, u32> = CoalescingCache::new();
        let mut n = 0u32;
        for _ in 0..2 {
            n = cache
                .get_or_produce::<String, _, _>("k".to_string(), || async {
                    Ok((n + 1, Duration::from_secs(60)))
                })
                .await
                .unwrap();
            cache.evict(&"k".to_string());
        }
        assert_eq!(n, 2);
    }
}
