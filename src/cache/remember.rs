//! Compute-once helpers for query and model results.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::keys::KeyBuilder;
use super::store::CacheStore;

/// Caches arbitrary serializable results behind the fail-open store.
///
/// Values go through `serde_json`, so anything cached here must round-trip through it.
#[derive(Clone)]
pub struct ModelCache {
    store: CacheStore,
    keys: KeyBuilder,
    eager_relations: BTreeMap<String, Vec<String>>,
}

impl ModelCache {
    pub fn new(
        store: CacheStore,
        keys: KeyBuilder,
        eager_relations: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            store,
            keys,
            eager_relations,
        }
    }

    /// Return the cached value under `parts`, or run `compute` and keep its `Ok` result for
    /// `ttl`. Errors from `compute` are returned as-is and nothing is stored.
    pub async fn remember<T, E, I, S, F, Fut>(
        &self,
        parts: I,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.keys.build(parts);
        if let Some(hit) = self.store.get_json(&key).await {
            debug!(key = %key, outcome = "hit", "model cache");
            return Ok(hit);
        }

        let value = compute().await?;
        self.store.put_json(&key, &value, ttl).await;
        Ok(value)
    }

    /// Like [`ModelCache::remember`] but the entry never expires.
    pub async fn remember_forever<T, E, I, S, F, Fut>(&self, parts: I, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.keys.forever(parts);
        if let Some(hit) = self.store.get_json(&key).await {
            return Ok(hit);
        }

        let value = compute().await?;
        self.store.forever_json(&key, &value).await;
        Ok(value)
    }

    /// Load one entity through the cache.
    ///
    /// `loader` receives the eager relations configured for the entity type (`product`
    /// looks up `products`). A `None` result is not cached.
    pub async fn find<T, E, F, Fut>(
        &self,
        entity_type: &str,
        id: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = self.keys.model(entity_type, id);
        if let Some(hit) = self.store.get_json(&key).await {
            return Ok(Some(hit));
        }

        let relations = self.eager_relations(&format!("{}s", entity_type.to_ascii_lowercase()));
        let Some(value) = loader(relations).await? else {
            return Ok(None);
        };
        self.store.put_json(&key, &value, ttl).await;
        Ok(Some(value))
    }

    /// Configured default relations for `model_type`, empty when none are set.
    pub fn eager_relations(&self, model_type: &str) -> Vec<String> {
        self.eager_relations
            .get(model_type)
            .cloned()
            .unwrap_or_default()
    }
}
