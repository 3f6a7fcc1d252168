//! Storefront Cache System
//!
//! Response caching and invalidation for the storefront:
//!
//! - **Policy**: decides per request whether a response may be cached and for how long
//! - **Response cache**: middleware that serves stored bodies and negotiates `ETag`s
//! - **Store**: fail-open adapter over memory, file or Redis backends
//! - **Invalidation**: glob eviction triggered by catalogue mutations
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `storefront-cache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! driver = "memory"
//! namespace = "perf"
//! store_timeout_ms = 250
//! # ... see config.rs for all options
//! ```

pub mod backend;
mod config;
mod headers;
mod invalidation;
pub(crate) mod keys;
pub(crate) mod lock;
mod middleware;
pub mod orchestrator;
mod pattern;
pub mod policy;
mod remember;
mod store;

pub use backend::{CacheBackend, CacheEntry, FileBackend, MemoryBackend, RedisBackend, StoreError};
pub use config::{CacheConfig, StoreDriver};
pub use headers::{http_date, if_none_match};
pub use invalidation::{InvalidationScope, Invalidator};
pub use keys::{CacheKey, ETag, KeyBuilder, build_key, content_hash};
pub use middleware::{
    Authenticated, CacheState, CachedResponse, RouteName, RouteTable, response_cache_layer,
};
pub use pattern::{InvalidationError, KeyPattern};
pub use policy::{CachePolicyDecision, PolicyConfig, PolicyEngine, RequestDescriptor, Verdict};
pub use remember::ModelCache;
pub use store::CacheStore;

pub(crate) mod metric_names {
    pub(crate) use super::invalidation::METRIC_INVALIDATED_KEYS_TOTAL;
    pub(crate) use super::middleware::{
        METRIC_HIT_TOTAL, METRIC_MISS_TOTAL, METRIC_NOT_MODIFIED_TOTAL,
    };
}
