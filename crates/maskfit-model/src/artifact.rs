//! Trained artifact assembly and the trainer family dispatch seam.
//!
//! [`ModelArtifact`] is the one serialized unit the registry stores: schema,
//! normalization, fitted parameters, threshold, optional calibration, and
//! the catalog snapshot the model was trained against. [`score_rows`] is the
//! only scoring path, so training-time validation and serving run the exact
//! same arithmetic.
//!
//! [`score_rows`]: ModelArtifact::score_rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use maskfit_core::config::TrainingConfig;
use maskfit_core::types::MaskCatalogEntry;

use crate::calibrate::CalibrationParams;
use crate::encoder::{encode_for_inference, RawRow, TrainingBatch};
use crate::error::{ModelError, ModelResult};
use crate::forest::{self, ForestParams};
use crate::gradient::{self, GradientParams};
use crate::hierarchical::{self, HierarchicalParams};
use crate::metrics::ValidationMetrics;
use crate::schema::{FeatureSchema, NormalizationStats};

/// Fitted parameters of one trainer family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelParams {
    Gradient(GradientParams),
    Forest(ForestParams),
    Hierarchical(HierarchicalParams),
}

impl ModelParams {
    #[must_use]
    pub fn family(&self) -> &'static str {
        match self {
            ModelParams::Gradient(_) => "gradient",
            ModelParams::Forest(_) => "forest",
            ModelParams::Hierarchical(_) => "hierarchical",
        }
    }

    /// Raw (uncalibrated) pass probabilities for normalized rows.
    pub fn predict_proba(
        &self,
        schema: &FeatureSchema,
        matrix: &[Vec<f64>],
    ) -> ModelResult<Vec<f64>> {
        match self {
            ModelParams::Gradient(p) => p.predict_proba(matrix),
            ModelParams::Forest(p) => p.predict_proba(matrix),
            ModelParams::Hierarchical(p) => p.predict_proba(schema, matrix),
        }
    }
}

/// What a trainer family returns to the training pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    pub params: ModelParams,
    pub threshold: f64,
    pub calibration: Option<CalibrationParams>,
    pub metrics: ValidationMetrics,
}

/// One fully trained, servable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub run_id: Uuid,
    pub backend: String,
    pub trained_at: DateTime<Utc>,
    pub feature_schema: FeatureSchema,
    pub normalization: NormalizationStats,
    pub params: ModelParams,
    pub decision_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationParams>,
    /// Catalog as imputed at training time; inference ranks against this.
    pub mask_catalog: Vec<MaskCatalogEntry>,
    pub metrics: ValidationMetrics,
}

impl ModelArtifact {
    /// Assemble the servable unit from a training run.
    #[must_use]
    pub fn assemble(
        backend: &str,
        batch: &TrainingBatch,
        outcome: TrainOutcome,
        mask_catalog: Vec<MaskCatalogEntry>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            backend: backend.to_string(),
            trained_at: Utc::now(),
            feature_schema: batch.schema.clone(),
            normalization: batch.stats.clone(),
            params: outcome.params,
            decision_threshold: outcome.threshold,
            calibration: outcome.calibration,
            mask_catalog,
            metrics: outcome.metrics,
        }
    }

    /// Encode, normalize, predict, and calibrate in one pass.
    ///
    /// Every serving call goes through here, against the artifact's own
    /// schema and statistics, which is what keeps feature encoding identical
    /// between training and inference.
    pub fn score_rows(&self, rows: &[RawRow]) -> ModelResult<Vec<f64>> {
        let mut matrix = encode_for_inference(rows, &self.feature_schema);
        self.normalization.apply(&self.feature_schema, &mut matrix);
        let probs = self.params.predict_proba(&self.feature_schema, &matrix)?;
        Ok(match &self.calibration {
            Some(c) => probs.into_iter().map(|p| c.apply(p)).collect(),
            None => probs,
        })
    }
}

/// Normalize the batch and hand it to the named trainer family.
pub fn train_model(
    backend: &str,
    batch: &TrainingBatch,
    config: &TrainingConfig,
) -> ModelResult<TrainOutcome> {
    let mut matrix = batch.matrix.clone();
    batch.stats.apply(&batch.schema, &mut matrix);

    match backend {
        "gradient" => gradient::train(&matrix, &batch.labels, config),
        "forest" => forest::train(&matrix, &batch.labels, config),
        "hierarchical" => hierarchical::train(&batch.schema, &matrix, &batch.labels, config),
        other => Err(ModelError::Training(format!("unknown model backend '{}'", other))),
    }
}
