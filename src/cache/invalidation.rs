//! Pattern eviction driven by content mutations.

use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::keys::KeyBuilder;
use super::pattern::InvalidationError;
use super::store::CacheStore;

pub(crate) const METRIC_INVALIDATED_KEYS_TOTAL: &str = "storefront_cache_invalidated_keys_total";

/// How far a single entity mutation reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Only `model:<entity>:<id>`.
    #[default]
    Exact,
    /// Every cached instance of the entity type.
    Entity,
    /// The entity type plus every cached storefront response.
    EntityAndResponses,
}

impl InvalidationScope {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidationScope::Exact => "exact",
            InvalidationScope::Entity => "entity",
            InvalidationScope::EntityAndResponses => "entity_and_responses",
        }
    }
}

#[derive(Clone)]
pub struct Invalidator {
    store: CacheStore,
    keys: KeyBuilder,
    response_tag: String,
    scope: InvalidationScope,
}

impl Invalidator {
    pub fn new(
        store: CacheStore,
        keys: KeyBuilder,
        response_tag: impl Into<String>,
        scope: InvalidationScope,
    ) -> Self {
        Self {
            store,
            keys,
            response_tag: response_tag.into(),
            scope,
        }
    }

    pub fn scope(&self) -> InvalidationScope {
        self.scope
    }

    /// Evict every key in the namespace whose suffix matches `pattern`, e.g.
    /// `model:product:*`. Safe to repeat.
    #[instrument(skip(self), fields(namespace = self.keys.namespace()))]
    pub async fn invalidate(&self, pattern: &str) -> Result<usize, InvalidationError> {
        self.evict(&self.keys.qualify_pattern(pattern)).await
    }

    /// Evict what the configured scope says a change to `entity_type`/`entity_id` affects.
    #[instrument(skip(self), fields(scope = self.scope.as_str()))]
    pub async fn on_entity_mutated(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<usize, InvalidationError> {
        let mut patterns = vec![self.keys.model_pattern(entity_type, entity_id)];

        if matches!(
            self.scope,
            InvalidationScope::Entity | InvalidationScope::EntityAndResponses
        ) {
            let entity = self.keys.build(["model", &entity_type.to_ascii_lowercase()]);
            patterns.push(format!("{entity}:*"));
        }
        if self.scope == InvalidationScope::EntityAndResponses {
            let responses = self.keys.build(["response", self.response_tag.as_str()]);
            patterns.push(format!("{responses}:*"));
        }

        let mut removed = 0;
        for pattern in &patterns {
            removed += self.evict(pattern).await?;
        }

        info!(entity_type, entity_id, removed, "Invalidated cache after mutation");
        Ok(removed)
    }

    async fn evict(&self, pattern: &str) -> Result<usize, InvalidationError> {
        let removed = self.store.delete_by_pattern(pattern).await?;
        debug!(pattern, removed, "Evicted cache keys");
        counter!(METRIC_INVALIDATED_KEYS_TOTAL).increment(removed as u64);
        Ok(removed)
    }
}
