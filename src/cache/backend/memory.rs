use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use time::OffsetDateTime;

use super::{CacheBackend, CacheEntry, StoreError};
use crate::cache::keys::CacheKey;
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::pattern::KeyPattern;

const SOURCE: &str = "cache::backend::memory";

/// In-process store with LRU eviction.
///
/// Expired entries are dropped when they are next read; nothing sweeps them eagerly.
pub struct MemoryBackend {
    entries: RwLock<LruCache<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        match entries.get(key.as_str()) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }

        entries.pop(key.as_str());
        Ok(None)
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let entry = CacheEntry::new(key, value, ttl, OffsetDateTime::now_utc());
        rw_write(&self.entries, SOURCE, "put").put(key.as_str().to_string(), entry);
        Ok(())
    }

    async fn forget(&self, key: &CacheKey) -> Result<(), StoreError> {
        rw_write(&self.entries, SOURCE, "forget").pop(key.as_str());
        Ok(())
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_matching");
        let doomed = entries
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();

        for key in &doomed {
            entries.pop(key);
        }

        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::keys::build_key;

    fn backend(capacity: usize) -> MemoryBackend {
        MemoryBackend::new(NonZeroUsize::new(capacity).expect("non-zero capacity"))
    }

    #[tokio::test]
    async fn put_get_forget_roundtrip() {
        let store = backend(8);
        let key = build_key("perf", ["model", "product", "5"]);

        store
            .put(&key, Bytes::from("payload"), Some(Duration::from_secs(60)))
            .await
            .expect("put");
        assert_eq!(
            store.get(&key).await.expect("get"),
            Some(Bytes::from("payload"))
        );

        store.forget(&key).await.expect("forget");
        assert_eq!(store.get(&key).await.expect("get"), None);

        store.forget(&key).await.expect("forgetting twice is fine");
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss_and_are_dropped() {
        let store = backend(8);
        let key = build_key("perf", ["short"]);

        store
            .put(&key, Bytes::from("v"), Some(Duration::ZERO))
            .await
            .expect("put");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).await.expect("get"), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let store = backend(2);
        let first = build_key("perf", ["1"]);
        let second = build_key("perf", ["2"]);
        let third = build_key("perf", ["3"]);

        store.put(&first, Bytes::from("1"), None).await.expect("put");
        store.put(&second, Bytes::from("2"), None).await.expect("put");
        store.put(&third, Bytes::from("3"), None).await.expect("put");

        assert_eq!(store.get(&first).await.expect("get"), None);
        assert!(store.get(&second).await.expect("get").is_some());
        assert!(store.get(&third).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn delete_matching_leaves_unrelated_keys() {
        let store = backend(8);
        for key in [
            build_key("perf", ["model", "product", "5"]),
            build_key("perf", ["model", "product", "9"]),
            build_key("perf", ["model", "category", "1"]),
        ] {
            store.put(&key, Bytes::from("v"), None).await.expect("put");
        }

        let pattern = KeyPattern::new("perf:model:product:*").expect("pattern");
        assert_eq!(store.delete_matching(&pattern).await.expect("delete"), 2);
        assert_eq!(store.delete_matching(&pattern).await.expect("delete"), 0);
        assert_eq!(store.len(), 1);
        assert!(
            store
                .get(&build_key("perf", ["model", "category", "1"]))
                .await
                .expect("get")
                .is_some()
        );
    }

    #[tokio::test]
    async fn recovers_from_poisoned_lock() {
        let store = backend(4);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        let key = build_key("perf", ["after-poison"]);
        store.put(&key, Bytes::from("v"), None).await.expect("put");
        assert!(store.get(&key).await.expect("get").is_some());
    }
}
