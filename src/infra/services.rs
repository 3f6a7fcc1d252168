//! Assembly of the cache services shared by the listeners and the CLI commands.

use std::sync::Arc;

use tracing::info;

use crate::cache::{
    CacheBackend, CacheConfig, CacheState, CacheStore, FileBackend, Invalidator, KeyBuilder,
    MemoryBackend, ModelCache, PolicyEngine, RedisBackend, RouteTable, StoreDriver,
};
use crate::config::Settings;
use crate::instrumentation::{DiagnosticSink, Instrumentation};

use super::error::InfraError;

/// Open the backing store selected by `config.driver`.
///
/// Redis is not contacted here; the first store call connects lazily.
pub fn open_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, InfraError> {
    let backend: Arc<dyn CacheBackend> = match config.driver {
        StoreDriver::Memory => Arc::new(MemoryBackend::new(config.memory_capacity_non_zero())),
        StoreDriver::File => {
            std::fs::create_dir_all(&config.file_directory)?;
            Arc::new(FileBackend::new(config.file_directory.clone()))
        }
        StoreDriver::Redis => Arc::new(RedisBackend::open(&config.redis_url)?),
    };

    info!(
        target = "storefront::cache::store",
        driver = config.driver.as_str(),
        "backing store opened"
    );
    Ok(backend)
}

/// Everything built on top of one backing store.
#[derive(Clone)]
pub struct CacheServices {
    pub config: CacheConfig,
    pub policy: PolicyEngine,
    pub store: CacheStore,
    pub keys: KeyBuilder,
    pub invalidator: Invalidator,
    pub models: ModelCache,
    pub instrumentation: Arc<Instrumentation>,
}

impl CacheServices {
    /// Build the services from resolved settings, reporting store failures to `sink`.
    pub fn from_settings(
        settings: &Settings,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, InfraError> {
        let config = settings.cache_config();
        let backend = open_backend(&config)?;
        let instrumentation = Arc::new(Instrumentation::new(
            settings.monitoring_config(),
            sink.clone(),
        ));
        Ok(Self::assemble(
            config,
            PolicyEngine::new(settings.policy_config()),
            backend,
            instrumentation,
        ))
    }

    /// Wire the services over an already opened backend.
    pub fn assemble(
        config: CacheConfig,
        policy: PolicyEngine,
        backend: Arc<dyn CacheBackend>,
        instrumentation: Arc<Instrumentation>,
    ) -> Self {
        let store = CacheStore::new(
            backend,
            config.store_timeout(),
            instrumentation.sink().clone(),
        );
        let keys = KeyBuilder::new(&config.namespace);
        let invalidator = Invalidator::new(
            store.clone(),
            keys.clone(),
            config.response_tag.clone(),
            config.invalidation_scope,
        );
        let models = ModelCache::new(store.clone(), keys.clone(), config.eager_relations.clone());

        Self {
            config,
            policy,
            store,
            keys,
            invalidator,
            models,
            instrumentation,
        }
    }

    /// State for the response cache middleware over `routes`.
    pub fn response_state(&self, routes: RouteTable) -> CacheState {
        CacheState::new(
            self.config.clone(),
            self.policy.clone(),
            self.store.clone(),
            self.instrumentation.clone(),
            routes,
        )
    }
}
