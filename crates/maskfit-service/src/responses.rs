//! Response envelopes returned by the dispatcher.
//!
//! Every method answers with `{statusCode, body}`. Infer bodies carry the
//! ranking as rank-indexed parallel maps (`"0"` is the best mask), which is
//! the shape downstream consumers already parse.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chrono::{DateTime, Utc};
use maskfit_registry::PublishedKeys;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::infer::MaskRanking;
use crate::train::TrainReport;

/// Outer `{statusCode, body}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

impl ServiceResponse {
    /// 200 response wrapping a serialized body.
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => Self { status_code: 200, body: value },
            Err(e) => Self::from_error(&ServiceError::Internal(format!(
                "response serialization failed: {}",
                e
            ))),
        }
    }

    /// Error response with the variant's status code and `{error}` body.
    pub fn from_error(err: &ServiceError) -> Self {
        Self {
            status_code: err.status_code(),
            body: serde_json::json!({ "error": err.to_string() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Body of a successful `infer` call.
///
/// `mask_id` and `proba_fit` are parallel maps keyed by rank; index 0 holds
/// the highest-probability mask. Integer keys serialize as JSON strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferBody {
    pub mask_id: BTreeMap<usize, i64>,
    pub proba_fit: BTreeMap<usize, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl InferBody {
    pub fn from_rankings(rankings: &[MaskRanking], threshold: f64) -> Self {
        let mut mask_id = BTreeMap::new();
        let mut proba_fit = BTreeMap::new();
        for (rank, entry) in rankings.iter().enumerate() {
            mask_id.insert(rank, entry.mask_id);
            proba_fit.insert(rank, entry.probability);
        }
        Self {
            mask_id,
            proba_fit,
            threshold: Some(threshold),
        }
    }
}

/// Body of a successful `train` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainBody {
    pub message: String,
    /// Registry keys written by the publish.
    pub artifacts: PublishedKeysBody,
    pub metrics: TrainReport,
}

/// Serializable mirror of [`PublishedKeys`] for response bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedKeysBody {
    pub model_latest: String,
    pub model_versioned: String,
    pub metrics_latest: String,
    pub metrics_versioned: String,
    pub catalog_latest: String,
}

impl From<PublishedKeys> for PublishedKeysBody {
    fn from(keys: PublishedKeys) -> Self {
        Self {
            model_latest: keys.model_latest,
            model_versioned: keys.model_versioned,
            metrics_latest: keys.metrics_latest,
            metrics_versioned: keys.metrics_versioned,
            catalog_latest: keys.catalog_latest,
        }
    }
}

/// Body of a successful `warmup` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupBody {
    pub message: String,
    pub backend: String,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope_shape() {
        let response = ServiceResponse::ok(&serde_json::json!({"message": "done"}));
        assert_eq!(response.status_code, 200);
        assert!(response.is_success());

        let serialized = serde_json::to_value(&response).unwrap();
        assert!(serialized.get("statusCode").is_some());
        assert_eq!(serialized["body"]["message"], "done");
    }

    #[test]
    fn test_error_envelope_carries_message() {
        let err = ServiceError::Input("missing required field: facial_measurements".into());
        let response = ServiceResponse::from_error(&err);
        assert_eq!(response.status_code, 400);
        assert!(!response.is_success());
        assert!(response.body["error"]
            .as_str()
            .unwrap()
            .contains("facial_measurements"));
    }

    #[test]
    fn test_infer_body_rank_indexing() {
        let rankings = vec![
            MaskRanking { mask_id: 11, model: "FM-300-L".into(), probability: 0.91 },
            MaskRanking { mask_id: 4, model: "FM-100-M".into(), probability: 0.62 },
            MaskRanking { mask_id: 7, model: "FM-200-S".into(), probability: 0.30 },
        ];
        let body = InferBody::from_rankings(&rankings, 0.55);

        assert_eq!(body.mask_id[&0], 11);
        assert_eq!(body.mask_id[&2], 7);
        assert_eq!(body.proba_fit[&0], 0.91);
        assert_eq!(body.threshold, Some(0.55));

        // Integer rank keys serialize as JSON object keys.
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["mask_id"]["0"], 11);
        assert_eq!(value["proba_fit"]["1"], 0.62);
    }

    #[test]
    fn test_infer_body_round_trips_through_json() {
        let rankings = vec![MaskRanking {
            mask_id: 2,
            model: "FM-100-S".into(),
            probability: 0.8,
        }];
        let body = InferBody::from_rankings(&rankings, 0.5);
        let text = serde_json::to_string(&body).unwrap();
        let parsed: InferBody = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.mask_id[&0], 2);
        assert_eq!(parsed.proba_fit[&0], 0.8);
    }
}
