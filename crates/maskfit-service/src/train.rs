//! Train orchestration: raw dataset in, published artifact out.
//!
//! The pipeline runs strictly in order: load and parse the dataset, impute
//! user measurements, derive and impute the mask catalog, build raw rows,
//! encode, train the configured backend, assemble the artifact, publish.
//! Nothing is published until the trained artifact is fully assembled, and
//! the model cache slot is invalidated only after the publish succeeded.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use maskfit_core::dataset;
use maskfit_impute::{impute_catalog, MeasurementImputer};
use maskfit_model::{
    encode_for_training, train_model, DiffMode, EncoderOptions, ModelArtifact, RawRow,
    ValidationMetrics,
};
use maskfit_registry::publish_artifact_with_metrics;

use crate::context::ServiceContext;
use crate::error::{ServiceError, ServiceResult};
use crate::requests::TrainRequest;
use crate::responses::{PublishedKeysBody, TrainBody};

/// Summary of one training run, serialized into the metrics document and
/// echoed in the train response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub run_id: Uuid,
    pub backend: String,
    pub environment: String,
    pub trained_at: DateTime<Utc>,
    /// Records parsed from the dataset, labeled or not.
    pub observations_total: usize,
    /// Records with a usable pass/fail label.
    pub observations_labeled: usize,
    /// Rows surviving the outlier filter and seen by the trainer.
    pub rows_encoded: usize,
    pub rows_dropped_outliers: usize,
    /// Share of positive labels among encoded rows.
    pub positive_rate: f64,
    /// Users whose measurement gaps were filled from donors.
    pub users_imputed: usize,
    /// Catalog perimeters resolved by any fallback strategy.
    pub perimeters_imputed: usize,
    /// Catalog entries left without a perimeter.
    pub masks_without_perimeter: usize,
    pub validation: ValidationMetrics,
    pub decision_threshold: f64,
    pub calibrated: bool,
    pub duration_seconds: f64,
}

/// Run the full training pipeline and publish the result.
pub async fn run_train(
    context: &ServiceContext,
    request: TrainRequest,
) -> ServiceResult<TrainBody> {
    let started = Instant::now();

    let data_url = request
        .data_url
        .or_else(|| context.config().training.data_url.clone())
        .ok_or_else(|| {
            ServiceError::Input("no data_url in request and none configured".into())
        })?;
    let label_field = request
        .target_col
        .unwrap_or_else(|| dataset::PREFERRED_LABEL_FIELD.to_string());

    info!(data_url = %data_url, label_field = %label_field, "loading training dataset");
    let document = dataset::load_data_url(&data_url).await?;
    let mut data = dataset::parse_document_with_label(&document, &label_field)?;
    let observations_total = data.observations.len();

    let imputer = MeasurementImputer::new(&context.config().imputation);
    let measurement_summary = imputer.impute(&mut data.observations);
    debug!(
        users_total = measurement_summary.users_total,
        users_imputed = measurement_summary.users_imputed,
        users_unresolved = measurement_summary.users_unresolved,
        "measurement imputation finished"
    );

    let mut catalog = data.derive_catalog();
    let perimeter_summary = impute_catalog(&mut catalog, &data.observations);
    let perimeters_imputed = perimeter_summary.base_size_exact
        + perimeter_summary.base_size_nearest
        + perimeter_summary.co_test
        + perimeter_summary.style_median
        + perimeter_summary.global_median;
    debug!(
        catalog_size = catalog.len(),
        already_known = perimeter_summary.already_known,
        imputed = perimeters_imputed,
        insufficient = perimeter_summary.insufficient_data,
        "perimeter imputation finished"
    );

    // Observations borrow the catalog's imputed perimeter when their own
    // record carried none.
    let perimeter_by_mask: HashMap<i64, f64> = catalog
        .iter()
        .filter_map(|entry| entry.perimeter_mm.map(|p| (entry.id, p)))
        .collect();

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for obs in data.labeled() {
        let Some(label) = obs.label else { continue };
        let perimeter = obs
            .perimeter_mm
            .or_else(|| perimeter_by_mask.get(&obs.mask_id).copied());
        rows.push(RawRow::new(
            &obs.measurements,
            obs.mask_id,
            obs.style,
            obs.strap_type,
            perimeter,
        ));
        labels.push(label.as_f64());
    }
    if rows.is_empty() {
        return Err(ServiceError::Data(
            "dataset has no labeled observations".into(),
        ));
    }
    let observations_labeled = rows.len();

    let mut training = context.config().training.clone();
    if let Some(epochs) = request.epochs {
        training.epochs = epochs;
    }
    let backend = training.backend.clone();

    // The hierarchical model groups on coarser perimeter bins than the
    // discriminative families.
    let options = EncoderOptions {
        bin_width_mm: if backend == "hierarchical" {
            training.hier_bin_width_mm
        } else {
            context.config().encoding.bin_width_mm
        },
        diff_mode: DiffMode::OneHot,
        z_score_limit: context.config().encoding.z_score_limit,
    };
    let batch = encode_for_training(&rows, &labels, &options)?;
    info!(
        backend = %backend,
        rows = batch.matrix.len(),
        columns = batch.schema.columns.len(),
        dropped_outliers = batch.dropped_outliers,
        "training batch encoded"
    );

    // Training is CPU-bound and can run for minutes; keep it off the
    // async worker threads.
    let task_backend = backend.clone();
    let (batch, outcome) = tokio::task::spawn_blocking(move || {
        train_model(&task_backend, &batch, &training).map(|outcome| (batch, outcome))
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("training task failed: {}", e)))??;

    let rows_encoded = batch.matrix.len();
    let rows_dropped_outliers = batch.dropped_outliers;
    let positive_rate = if batch.labels.is_empty() {
        0.0
    } else {
        batch.labels.iter().filter(|l| **l > 0.5).count() as f64 / batch.labels.len() as f64
    };

    let artifact = ModelArtifact::assemble(&backend, &batch, outcome, catalog);
    let report = TrainReport {
        run_id: artifact.run_id,
        backend: backend.clone(),
        environment: context.environment().to_string(),
        trained_at: artifact.trained_at,
        observations_total,
        observations_labeled,
        rows_encoded,
        rows_dropped_outliers,
        positive_rate,
        users_imputed: measurement_summary.users_imputed,
        perimeters_imputed,
        masks_without_perimeter: perimeter_summary.insufficient_data,
        validation: artifact.metrics.clone(),
        decision_threshold: artifact.decision_threshold,
        calibrated: artifact.calibration.is_some(),
        duration_seconds: started.elapsed().as_secs_f64(),
    };

    // The full run report doubles as the stored metrics document.
    let metrics_document = serde_json::to_value(&report)
        .map_err(|e| ServiceError::Internal(format!("metrics serialization failed: {}", e)))?;
    let keys = publish_artifact_with_metrics(
        context.store(),
        context.environment(),
        &backend,
        &artifact,
        &metrics_document,
    )
    .await?;
    context.cache().invalidate(context.environment(), &backend);

    info!(
        run_id = %report.run_id,
        backend = %report.backend,
        rows = report.rows_encoded,
        threshold = report.decision_threshold,
        duration_s = format!("{:.2}", report.duration_seconds),
        "model trained and published"
    );

    Ok(TrainBody {
        message: format!("{} model trained and published", backend),
        artifacts: PublishedKeysBody::from(keys),
        metrics: report,
    })
}
