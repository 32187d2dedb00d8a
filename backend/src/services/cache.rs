use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// In-process cache for definitions loaded from the record store.
///
/// Entries live until invalidated, or until `ttl` elapses when one is set.
/// Values are expected to be cheap to clone (`Arc<T>`).
pub struct DefinitionCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> DefinitionCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new()
        }
    }

    /// Get a value from cache
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if !self.is_expired(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, key: K, value: V) {
        self.entries.write().await.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Get a value from cache, or load and store it if not present.
    /// A loader returning `None` leaves the cache untouched.
    pub async fn get_or_load<F, Fut, E>(&self, key: &K, load: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(Some(cached));
        }

        let loaded = load().await?;
        if let Some(value) = &loaded {
            self.set(key.clone(), value.clone()).await;
        }

        Ok(loaded)
    }

    /// Delete a specific cache entry
    pub async fn invalidate(&self, key: &K) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            total_entries: entries.len(),
            expired_entries: entries.values().filter(|e| self.is_expired(e)).count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        self.ttl.is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl)
    }
}

impl<K, V> Default for DefinitionCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_get_or_load_only_loads_once() {
        let cache: DefinitionCache<u32, String> = DefinitionCache::new();
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load(&7, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(Some("seven".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(value.as_deref(), Some("seven"));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_missing_values_are_not_cached() {
        let cache: DefinitionCache<u32, String> = DefinitionCache::new();
        let value = cache.get_or_load(&1, || async { Ok::<_, ()>(None) }).await.unwrap();
        assert!(value.is_none());
        assert_eq!(cache.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache: DefinitionCache<&'static str, i32> = DefinitionCache::new();
        cache.set("rules", 1).await;
        assert!(cache.invalidate(&"rules").await);
        assert!(!cache.invalidate(&"rules").await);

        let value = cache.get_or_load(&"rules", || async { Ok::<_, ()>(Some(2)) }).await.unwrap();
        assert_eq!(value, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache: DefinitionCache<u32, i32> = DefinitionCache::with_ttl(Duration::from_secs(60));
        cache.set(1, 10).await;
        assert_eq!(cache.get(&1).await, Some(10));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.stats().await.expired_entries, 1);
    }
}
