//! Cache configuration.
//!
//! Controls the response cache, the backing store and invalidation reach via the
//! `[cache]`, `[invalidation]` and `[eager_loading]` sections of `storefront-cache.toml`.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::invalidation::InvalidationScope;

const DEFAULT_LIFETIME_SECONDS: u64 = 604_800;
const DEFAULT_NAMESPACE: &str = "perf";
const DEFAULT_RESPONSE_TAG: &str = "storefront_response_cache";
const DEFAULT_MEMORY_CAPACITY: usize = 1024;
const DEFAULT_FILE_DIRECTORY: &str = "storage/cache/data";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;
const DEFAULT_RESPONSE_BODY_LIMIT_BYTES: usize = 1024 * 1024;
const DEFAULT_SESSION_COOKIE: &str = "storefront_session";

/// Which backing store holds cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreDriver {
    #[default]
    Memory,
    File,
    Redis,
}

impl StoreDriver {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreDriver::Memory => "memory",
            StoreDriver::File => "file",
            StoreDriver::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch for the response cache middleware.
    pub enabled: bool,
    /// Default lifetime for cached query and model results.
    pub lifetime_seconds: u64,
    pub driver: StoreDriver,
    /// Prefix of every key written by this process.
    pub namespace: String,
    /// Tag segment shared by all response keys, so they can be flushed together.
    pub response_tag: String,
    pub memory_capacity: usize,
    pub file_directory: PathBuf,
    pub redis_url: String,
    /// Upper bound for a single backing-store call.
    pub store_timeout_ms: u64,
    /// Larger bodies are served but never stored.
    pub response_body_limit_bytes: usize,
    /// Cookie whose presence marks a request as authenticated.
    pub session_cookie: String,
    pub invalidation_scope: InvalidationScope,
    /// Default eager relations keyed by plural model type.
    pub eager_relations: BTreeMap<String, Vec<String>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime_seconds: DEFAULT_LIFETIME_SECONDS,
            driver: StoreDriver::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            response_tag: DEFAULT_RESPONSE_TAG.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            file_directory: PathBuf::from(DEFAULT_FILE_DIRECTORY),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            response_body_limit_bytes: DEFAULT_RESPONSE_BODY_LIMIT_BYTES,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            invalidation_scope: InvalidationScope::default(),
            eager_relations: default_eager_relations(),
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let cache = &settings.cache;
        Self {
            enabled: cache.enabled,
            lifetime_seconds: cache.lifetime_seconds.get(),
            driver: cache.driver,
            namespace: cache.namespace.clone(),
            response_tag: cache.tag.clone(),
            memory_capacity: cache.memory_capacity.get(),
            file_directory: cache.file_directory.clone(),
            redis_url: cache.redis_url.clone(),
            store_timeout_ms: cache.store_timeout_ms.get(),
            response_body_limit_bytes: cache.response_body_limit_bytes.get(),
            session_cookie: cache.session_cookie.clone(),
            invalidation_scope: settings.invalidation.scope,
            eager_relations: settings.eager_loading.default_relations.clone(),
        }
    }
}

impl CacheConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_seconds)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

pub(crate) fn default_eager_relations() -> BTreeMap<String, Vec<String>> {
    let owned = |items: &[&str]| -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    };
    BTreeMap::from([
        (
            "products".to_string(),
            owned(&["category", "images", "attributes"]),
        ),
        ("categories".to_string(), owned(&["parent", "children"])),
        ("orders".to_string(), owned(&["customer", "items"])),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.lifetime(), Duration::from_secs(604_800));
        assert_eq!(config.driver, StoreDriver::Memory);
        assert_eq!(config.namespace, "perf");
        assert_eq!(config.response_tag, "storefront_response_cache");
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.response_body_limit_bytes, 1024 * 1024);
        assert_eq!(config.invalidation_scope, InvalidationScope::Exact);
        assert_eq!(
            config.eager_relations["products"],
            ["category", "images", "attributes"]
        );
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }

    #[test]
    fn partial_section_keeps_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"driver":"redis","invalidation_scope":"entity"}"#)
                .expect("config should parse");
        assert_eq!(config.driver, StoreDriver::Redis);
        assert_eq!(config.invalidation_scope, InvalidationScope::Entity);
        assert_eq!(config.namespace, "perf");
    }
}
