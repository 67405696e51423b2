//! Process-wide cache of loaded model artifacts.
//!
//! Warm inference must not re-read and re-decode the artifact blob on every
//! request, so decoded artifacts are held here behind `Arc` and shared across
//! requests. A reload after retraining swaps the `Arc` for the affected
//! (environment, backend) slot; in-flight requests keep scoring against the
//! clone they already hold, so a loaded artifact is never mutated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use maskfit_model::ModelArtifact;
use tracing::{debug, info};

use crate::error::RegistryResult;
use crate::publisher;
use crate::store::BlobStore;

/// Thread-safe hit/miss counters.
#[derive(Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared cache of decoded artifacts keyed by (environment, backend).
///
/// # Thread Safety
///
/// Entries live behind an `RwLock`: lookups take the read lock, loads and
/// reloads take the write lock only to swap an `Arc` in or out. The decode
/// itself happens outside any lock.
#[derive(Default)]
pub struct ModelCache {
    entries: RwLock<HashMap<(String, String), Arc<ModelArtifact>>>,
    metrics: CacheMetrics,
}

/// The process-wide cache instance used by the serving path.
pub fn shared() -> Arc<ModelCache> {
    static CACHE: OnceLock<Arc<ModelCache>> = OnceLock::new();
    Arc::clone(CACHE.get_or_init(|| Arc::new(ModelCache::default())))
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<(String, String), Arc<ModelArtifact>>> {
        self.entries.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_guard(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<(String, String), Arc<ModelArtifact>>> {
        self.entries.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Cached artifact for the slot, if one has been loaded.
    pub fn get(&self, environment: &str, backend: &str) -> Option<Arc<ModelArtifact>> {
        let found = self
            .read_guard()
            .get(&(environment.to_string(), backend.to_string()))
            .cloned();
        match &found {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        found
    }

    /// Return the cached artifact, loading `latest` from the store on a miss.
    pub async fn get_or_load(
        &self,
        store: &dyn BlobStore,
        environment: &str,
        backend: &str,
    ) -> RegistryResult<Arc<ModelArtifact>> {
        if let Some(artifact) = self.get(environment, backend) {
            debug!(
                environment,
                backend,
                run_id = %artifact.run_id,
                "model cache hit"
            );
            return Ok(artifact);
        }
        self.reload(store, environment, backend).await
    }

    /// Fetch `latest` from the store and swap it into the cache.
    ///
    /// Used both on a cold miss and after a publish made the cached copy
    /// stale. Concurrent reloads of the same slot are harmless: each decodes
    /// its own copy and the last swap wins.
    pub async fn reload(
        &self,
        store: &dyn BlobStore,
        environment: &str,
        backend: &str,
    ) -> RegistryResult<Arc<ModelArtifact>> {
        let artifact = Arc::new(publisher::load_latest(store, environment, backend).await?);
        self.write_guard().insert(
            (environment.to_string(), backend.to_string()),
            Arc::clone(&artifact),
        );
        info!(
            environment,
            backend,
            run_id = %artifact.run_id,
            trained_at = %artifact.trained_at,
            "model cache (re)loaded"
        );
        Ok(artifact)
    }

    /// Drop one slot so the next access reloads from the store.
    pub fn invalidate(&self, environment: &str, backend: &str) {
        self.write_guard()
            .remove(&(environment.to_string(), backend.to_string()));
    }

    /// Drop every cached artifact.
    pub fn clear(&self) {
        self.write_guard().clear();
    }

    pub fn len(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_guard().is_empty()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use chrono::{TimeZone, Utc};
    use maskfit_model::forest::ForestParams;
    use maskfit_model::{
        DiffMode, FeatureSchema, ModelParams, NormalizationStats, ValidationMetrics,
    };
    use uuid::Uuid;

    fn create_artifact(threshold: f64) -> ModelArtifact {
        ModelArtifact {
            run_id: Uuid::new_v4(),
            backend: "forest".to_string(),
            trained_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            feature_schema: FeatureSchema {
                columns: vec!["nose_mm".to_string()],
                numeric_columns: vec!["nose_mm".to_string()],
                diff_mode: DiffMode::OneHot,
                bin_width_mm: 10.0,
                bin_min: None,
                bin_max: None,
            },
            normalization: NormalizationStats {
                columns: vec!["nose_mm".to_string()],
                mean: vec![55.0],
                std: vec![4.0],
            },
            params: ModelParams::Forest(ForestParams { input_dim: 1, trees: Vec::new() }),
            decision_threshold: threshold,
            calibration: None,
            mask_catalog: Vec::new(),
            metrics: ValidationMetrics::unavailable(0, 0.0),
        }
    }

    #[tokio::test]
    async fn test_get_or_load_misses_then_hits() {
        let store = MemoryBlobStore::new();
        let published = create_artifact(0.55);
        publisher::publish_artifact(&store, "dev", "forest", &published)
            .await
            .unwrap();

        let cache = ModelCache::new();
        assert!(cache.get("dev", "forest").is_none());
        assert_eq!(cache.metrics().misses(), 1);

        let first = cache.get_or_load(&store, "dev", "forest").await.unwrap();
        assert_eq!(first.run_id, published.run_id);

        let second = cache.get_or_load(&store, "dev", "forest").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.metrics().hits() >= 1);
    }

    #[tokio::test]
    async fn test_reload_swaps_arc_without_touching_old_clone() {
        let store = MemoryBlobStore::new();
        let original = create_artifact(0.55);
        publisher::publish_artifact(&store, "dev", "forest", &original)
            .await
            .unwrap();

        let cache = ModelCache::new();
        let held = cache.get_or_load(&store, "dev", "forest").await.unwrap();

        let replacement = create_artifact(0.80);
        publisher::publish_artifact(&store, "dev", "forest", &replacement)
            .await
            .unwrap();
        let fresh = cache.reload(&store, "dev", "forest").await.unwrap();

        assert_eq!(fresh.run_id, replacement.run_id);
        assert_eq!(fresh.decision_threshold, 0.80);
        // The clone taken before the reload still sees the original model.
        assert_eq!(held.run_id, original.run_id);
        assert_eq!(held.decision_threshold, 0.55);
        assert!(!Arc::ptr_eq(&held, &fresh));
    }

    #[tokio::test]
    async fn test_slots_are_independent_per_environment_and_backend() {
        let store = MemoryBlobStore::new();
        let dev = create_artifact(0.50);
        let prod = create_artifact(0.65);
        publisher::publish_artifact(&store, "dev", "forest", &dev).await.unwrap();
        publisher::publish_artifact(&store, "prod", "forest", &prod).await.unwrap();

        let cache = ModelCache::new();
        cache.get_or_load(&store, "dev", "forest").await.unwrap();
        cache.get_or_load(&store, "prod", "forest").await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.invalidate("dev", "forest");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("prod", "forest").is_some());
    }

    #[tokio::test]
    async fn test_get_or_load_propagates_missing_artifact() {
        let store = MemoryBlobStore::new();
        let cache = ModelCache::new();
        let err = cache.get_or_load(&store, "dev", "gradient").await.unwrap_err();
        assert!(matches!(err, crate::error::RegistryError::NotFound(_)));
        assert!(cache.is_empty());
    }
}
