//! Byte-bounded FIFO cache with prefix invalidation (component G, spec §4.G).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    prefix: String,
}

struct Inner {
    store: HashMap<String, Entry>,
    order: VecDeque<String>,
    prefix_index: HashMap<String, std::collections::HashSet<String>>,
    total_size: usize,
}

/// Keys are shaped `"<model_label>|<fn_name>:<id>:<hash>"` so that
/// `invalidate(model_label)` drops every entry for one tree type.
pub struct TreeCache {
    inner: Arc<RwLock<Inner>>,
    limit: usize,
}

fn key_prefix(key: &str) -> String {
    key.split('|').next().unwrap_or(key).to_string()
}

impl TreeCache {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                store: HashMap::new(),
                order: VecDeque::new(),
                prefix_index: HashMap::new(),
                total_size: 0,
            })),
            limit: limit_bytes,
        }
    }

    pub fn make_key(model_label: &str, fn_name: &str, id: i64, hash: u64) -> String {
        format!("{model_label}|{fn_name}:{id}:{hash:x}")
    }

    /// Insert `value` (already serialized) under `key`, evicting the
    /// oldest entries while `total_size > limit`. Eviction runs inline,
    /// synchronously, under the same write-lock acquisition (§4.G /
    /// SPEC_FULL.md §4.G design note).
    pub async fn set(&self, key: String, value: Vec<u8>) {
        let size = value.len();
        let prefix = key_prefix(&key);
        let mut guard = self.inner.write().await;

        if let Some(old) = guard.store.remove(&key) {
            guard.total_size -= old.value.len();
            guard.order.retain(|k| k != &key);
            if let Some(set) = guard.prefix_index.get_mut(&old.prefix) {
                set.remove(&key);
            }
        }

        guard.prefix_index.entry(prefix.clone()).or_default().insert(key.clone());
        guard.order.push_back(key.clone());
        guard.total_size += size;
        guard.store.insert(key, Entry { value, prefix });

        while guard.total_size > self.limit {
            let Some(oldest) = guard.order.pop_front() else {
                break;
            };
            if let Some(entry) = guard.store.remove(&oldest) {
                guard.total_size -= entry.value.len();
                if let Some(set) = guard.prefix_index.get_mut(&entry.prefix) {
                    set.remove(&oldest);
                    if set.is_empty() {
                        guard.prefix_index.remove(&entry.prefix);
                    }
                }
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().await.store.get(key).map(|e| e.value.clone())
    }

    /// Drop every entry whose key starts with `prefix + "|"`.
    pub async fn invalidate(&self, prefix: &str) {
        let mut guard = self.inner.write().await;
        let Some(keys) = guard.prefix_index.remove(prefix) else {
            return;
        };
        for key in keys {
            if let Some(entry) = guard.store.remove(&key) {
                guard.total_size -= entry.value.len();
            }
        }
        guard.order.retain(|k| key_prefix(k) != prefix);
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.store.clear();
        guard.order.clear();
        guard.prefix_index.clear();
        guard.total_size = 0;
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trips() {
        let cache = TreeCache::new(1024);
        let key = TreeCache::make_key("widgets", "ancestors", 5, 7);
        cache.set(key.clone(), b"hello".to_vec()).await;
        assert_eq!(cache.get(&key).await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn get_miss_returns_none() {
        let cache = TreeCache::new(1024);
        assert_eq!(cache.get("nope").await, None);
    }

    #[tokio::test]
    async fn invalidate_drops_only_matching_prefix() {
        let cache = TreeCache::new(1024);
        let k1 = TreeCache::make_key("widgets", "ancestors", 1, 1);
        let k2 = TreeCache::make_key("widgets", "descendants", 2, 2);
        let k3 = TreeCache::make_key("gadgets", "ancestors", 1, 1);
        cache.set(k1.clone(), b"a".to_vec()).await;
        cache.set(k2.clone(), b"b".to_vec()).await;
        cache.set(k3.clone(), b"c".to_vec()).await;

        cache.invalidate("widgets").await;

        assert_eq!(cache.get(&k1).await, None);
        assert_eq!(cache.get(&k2).await, None);
        assert_eq!(cache.get(&k3).await, Some(b"c".to_vec()));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_oldest_entries_once_over_limit() {
        let cache = TreeCache::new(10);
        let k1 = TreeCache::make_key("widgets", "a", 1, 1);
        let k2 = TreeCache::make_key("widgets", "b", 2, 2);
        let k3 = TreeCache::make_key("widgets", "c", 3, 3);

        cache.set(k1.clone(), vec![0u8; 5]).await;
        cache.set(k2.clone(), vec![0u8; 5]).await;
        // total is now 10, still within limit
        assert_eq!(cache.get(&k1).await.map(|v| v.len()), Some(5));

        cache.set(k3.clone(), vec![0u8; 5]).await;
        // pushes total to 15 > 10, k1 (oldest) evicted
        assert_eq!(cache.get(&k1).await, None);
        assert!(cache.get(&k2).await.is_some());
        assert!(cache.get(&k3).await.is_some());
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let cache = TreeCache::new(1024);
        cache.set(TreeCache::make_key("widgets", "a", 1, 1), b"x".to_vec()).await;
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }
}
