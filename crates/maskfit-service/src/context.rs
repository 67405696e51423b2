//! Shared state behind every dispatched request.

use std::sync::Arc;

use maskfit_core::config::Config;
use maskfit_registry::cache;
use maskfit_registry::{BlobStore, FsBlobStore, MemoryBlobStore, ModelCache};

use crate::error::{ServiceError, ServiceResult};

/// Configuration plus the blob store and model cache handlers run against.
///
/// One context outlives many requests; the store and cache are shared
/// read-mostly state, so handlers borrow them rather than owning copies.
pub struct ServiceContext {
    config: Config,
    store: Arc<dyn BlobStore>,
    cache: Arc<ModelCache>,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    /// Build a context over explicit collaborators. Tests use this to pair an
    /// isolated store with an isolated cache.
    pub fn new(config: Config, store: Arc<dyn BlobStore>, cache: Arc<ModelCache>) -> Self {
        Self { config, store, cache }
    }

    /// Build the production context: store per `registry.backend`, the
    /// process-wide model cache.
    pub fn from_config(config: Config) -> ServiceResult<Self> {
        let store: Arc<dyn BlobStore> = match config.registry.backend.as_str() {
            "fs" => Arc::new(FsBlobStore::new(&config.registry.root)),
            "memory" => Arc::new(MemoryBlobStore::new()),
            other => {
                return Err(ServiceError::Internal(format!(
                    "unknown registry backend '{}'",
                    other
                )))
            }
        };
        Ok(Self::new(config, store, cache::shared()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &ModelCache {
        self.cache.as_ref()
    }

    /// Deployment environment, the first registry key segment.
    pub fn environment(&self) -> &str {
        &self.config.environment
    }

    /// Configured model family served and trained by this deployment.
    pub fn backend(&self) -> &str {
        &self.config.training.backend
    }
}
