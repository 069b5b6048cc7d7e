//! Short-lived caches held on the core context.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Map whose entries stop being served once older than the TTL.
///
/// Expired entries stay resident until overwritten, invalidated or swept by
/// [`TtlCache::sweep`].
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Stamped<V>>>,
    ttl: Duration,
}

struct Stamped<V> {
    value: V,
    stored: Instant,
}

impl<V> Stamped<V> {
    fn fresh(&self, ttl: Duration) -> bool {
        self.stored.elapsed() < ttl
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn put(&self, key: K, value: V) {
        let entry = Stamped {
            value,
            stored: Instant::now(),
        };
        self.entries.write().await.insert(key, entry);
    }

    #[cfg(test)]
    pub async fn put_at(&self, key: K, value: V, stored: Instant) {
        self.entries.write().await.insert(key, Stamped { value, stored });
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let guard = self.entries.read().await;
        guard
            .get(key)
            .filter(|entry| entry.fresh(self.ttl))
            .map(|entry| entry.value.clone())
    }

    pub async fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.write().await.remove(key).map(|e| e.value)
    }

    /// Drops every entry whose key matches `pred`; returns how many went.
    pub async fn invalidate_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|k, _| !pred(k));
        before - guard.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Removes expired entries; returns how many went.
    pub async fn sweep(&self) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.fresh(self.ttl));
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale(ttl: Duration) -> Instant {
        Instant::now() - (ttl + Duration::from_millis(1))
    }

    #[tokio::test]
    async fn fresh_entries_are_served() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(5));
        cache.put("u1".into(), 7).await;
        assert_eq!(cache.get(&"u1".to_string()).await, Some(7));
        assert_eq!(cache.get(&"u2".to_string()).await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let ttl = Duration::from_millis(10);
        let cache: TtlCache<String, u32> = TtlCache::new(ttl);
        cache.put_at("u1".into(), 7, stale(ttl)).await;
        assert_eq!(cache.get(&"u1".to_string()).await, None);
    }

    #[tokio::test]
    async fn sweep_drops_only_expired() {
        let ttl = Duration::from_millis(10);
        let cache: TtlCache<String, u32> = TtlCache::new(ttl);
        cache.put_at("old".into(), 1, stale(ttl)).await;
        cache.put("new".into(), 2).await;
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn invalidate_where_matches_keys() {
        let cache: TtlCache<(String, String), u32> = TtlCache::new(Duration::from_secs(5));
        cache.put(("u1".into(), "a".into()), 1).await;
        cache.put(("u1".into(), "b".into()), 2).await;
        cache.put(("u2".into(), "a".into()), 3).await;
        assert_eq!(cache.invalidate_where(|(user, _)| user == "u1").await, 2);
        assert_eq!(cache.get(&("u2".into(), "a".into())).await, Some(3));
    }
}
