//! Publish pipeline for trained artifacts.
//!
//! One training run produces one immutable timestamped model plus a metrics
//! document and a catalog snapshot. The mutable `_latest` aliases are written
//! only after every immutable blob is durable, which is the invariant that
//! keeps readers of `latest` from ever observing a half-published run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use maskfit_model::{ModelArtifact, ValidationMetrics};

use crate::codec;
use crate::error::RegistryResult;
use crate::keys;
use crate::store::BlobStore;

/// Keys written by one publish, echoed back to train callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedKeys {
    pub model_latest: String,
    pub model_versioned: String,
    pub metrics_latest: String,
    pub metrics_versioned: String,
    pub catalog_latest: String,
}

/// Human-readable metrics document stored next to each model blob.
#[derive(Debug, Serialize)]
struct MetricsDocument<'a> {
    run_id: Uuid,
    backend: &'a str,
    trained_at: DateTime<Utc>,
    decision_threshold: f64,
    metrics: &'a ValidationMetrics,
}

/// Write one training run to the store, deriving the metrics document from
/// the artifact itself.
pub async fn publish_artifact(
    store: &dyn BlobStore,
    environment: &str,
    backend: &str,
    artifact: &ModelArtifact,
) -> RegistryResult<PublishedKeys> {
    let metrics_doc = serde_json::to_value(MetricsDocument {
        run_id: artifact.run_id,
        backend: &artifact.backend,
        trained_at: artifact.trained_at,
        decision_threshold: artifact.decision_threshold,
        metrics: &artifact.metrics,
    })?;
    publish_artifact_with_metrics(store, environment, backend, artifact, &metrics_doc).await
}

/// Write one training run to the store with a caller-supplied metrics
/// document (the train pipeline passes its full run report here).
///
/// Order: versioned model, versioned metrics, then the `latest` model,
/// metrics, and catalog aliases. A failure partway through leaves the
/// previous `latest` generation fully intact.
pub async fn publish_artifact_with_metrics(
    store: &dyn BlobStore,
    environment: &str,
    backend: &str,
    artifact: &ModelArtifact,
    metrics_document: &serde_json::Value,
) -> RegistryResult<PublishedKeys> {
    let published = PublishedKeys {
        model_latest: keys::model_latest(environment, backend),
        model_versioned: keys::model_versioned(environment, backend, &artifact.trained_at),
        metrics_latest: keys::metrics_latest(environment, backend),
        metrics_versioned: keys::metrics_versioned(environment, backend, &artifact.trained_at),
        catalog_latest: keys::catalog_latest(environment, backend),
    };

    let model_bytes = codec::encode_artifact(artifact)?;
    let metrics_bytes = serde_json::to_vec_pretty(metrics_document)?;
    let catalog_bytes = serde_json::to_vec_pretty(&artifact.mask_catalog)?;

    store.put(&published.model_versioned, &model_bytes).await?;
    store.put(&published.metrics_versioned, &metrics_bytes).await?;
    store.put(&published.model_latest, &model_bytes).await?;
    store.put(&published.metrics_latest, &metrics_bytes).await?;
    store.put(&published.catalog_latest, &catalog_bytes).await?;

    info!(
        run_id = %artifact.run_id,
        environment,
        backend,
        key = %published.model_versioned,
        "published model artifact"
    );
    Ok(published)
}

/// Fetch and decode the current `latest` artifact for one (environment,
/// backend) pair.
pub async fn load_latest(
    store: &dyn BlobStore,
    environment: &str,
    backend: &str,
) -> RegistryResult<ModelArtifact> {
    let key = keys::model_latest(environment, backend);
    let bytes = store.get(&key).await?;
    let artifact = codec::decode_artifact(&bytes)?;
    debug!(key = %key, run_id = %artifact.run_id, "loaded latest artifact");
    Ok(artifact)
}
