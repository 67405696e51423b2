//! Method routing over normalized request envelopes.

use serde_json::Value;
use tracing::{info, warn};

use crate::context::ServiceContext;
use crate::error::{ServiceError, ServiceResult};
use crate::infer::{run_infer, run_warmup};
use crate::requests::{normalize_envelope, InferRequest, TrainRequest};
use crate::responses::ServiceResponse;
use crate::train::run_train;

/// Method names the dispatcher routes.
pub mod methods {
    pub const TRAIN: &str = "train";
    pub const INFER: &str = "infer";
    pub const WARMUP: &str = "warmup";
}

/// Entry point shared by every transport: one context, many requests.
pub struct Dispatcher {
    context: ServiceContext,
}

impl Dispatcher {
    pub fn new(context: ServiceContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Route a loose request envelope to its handler.
    ///
    /// Never returns an error: every failure becomes a `{statusCode, body}`
    /// envelope with the taxonomy's status code and an `{error}` body.
    pub async fn dispatch(&self, raw: Value) -> ServiceResponse {
        match self.try_dispatch(raw).await {
            Ok(response) => response,
            Err(err) => {
                warn!(status = err.status_code(), error = %err, "request failed");
                ServiceResponse::from_error(&err)
            }
        }
    }

    async fn try_dispatch(&self, raw: Value) -> ServiceResult<ServiceResponse> {
        let envelope = normalize_envelope(raw)?;
        info!(method = %envelope.method, "dispatching request");
        match envelope.method.as_str() {
            methods::TRAIN => {
                let request = TrainRequest::from_payload(&envelope.payload)?;
                let body = run_train(&self.context, request).await?;
                Ok(ServiceResponse::ok(&body))
            }
            methods::INFER => {
                let request = InferRequest::from_payload(&envelope.payload)?;
                let body = run_infer(&self.context, request).await?;
                Ok(ServiceResponse::ok(&body))
            }
            methods::WARMUP => {
                let body = run_warmup(&self.context).await?;
                Ok(ServiceResponse::ok(&body))
            }
            other => Err(ServiceError::Input(format!("unknown method: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{create_test_context, sample_measurements, write_test_dataset};
    use serde_json::json;

    async fn trained_dispatcher() -> Dispatcher {
        let dispatcher = Dispatcher::new(create_test_context("forest"));
        let dataset_file = write_test_dataset(40);
        let response = dispatcher
            .dispatch(json!({
                "method": "train",
                "data_url": dataset_file.path().display().to_string()
            }))
            .await;
        assert_eq!(response.status_code, 200, "train failed: {}", response.body);
        dispatcher
    }

    #[tokio::test]
    async fn test_train_then_infer_round_trip() {
        let dispatcher = trained_dispatcher().await;

        // No method field: infer is the default.
        let response = dispatcher
            .dispatch(json!({ "facial_measurements": sample_measurements() }))
            .await;
        assert_eq!(response.status_code, 200);

        let mask_ids = response.body["mask_id"].as_object().unwrap();
        let probas = response.body["proba_fit"].as_object().unwrap();
        assert_eq!(mask_ids.len(), 5);
        assert_eq!(probas.len(), 5);
        assert!(response.body["threshold"].is_number());

        let best = probas["0"].as_f64().unwrap();
        let worst = probas[&(probas.len() - 1).to_string()].as_f64().unwrap();
        assert!(best >= worst);
    }

    #[tokio::test]
    async fn test_train_response_reports_metrics() {
        let dispatcher = trained_dispatcher().await;
        let dataset_file = write_test_dataset(40);
        let response = dispatcher
            .dispatch(json!({
                "method": "train",
                "data_url": dataset_file.path().display().to_string()
            }))
            .await;

        assert_eq!(response.status_code, 200);
        let metrics = &response.body["metrics"];
        assert_eq!(metrics["backend"], "forest");
        assert_eq!(metrics["validation"]["heldout_evaluation"], true);
        assert!(metrics["decision_threshold"].as_f64().unwrap() >= 0.5);
        assert!(response.body["artifacts"]["model_versioned"]
            .as_str()
            .unwrap()
            .contains("fit_classifier_"));
    }

    #[tokio::test]
    async fn test_nested_body_envelope_routes() {
        let dispatcher = trained_dispatcher().await;
        let inner = json!({ "facial_measurements": sample_measurements() }).to_string();
        let response = dispatcher.dispatch(json!({ "body": inner })).await;
        assert_eq!(response.status_code, 200);
        assert!(response.body["mask_id"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_method_is_client_error() {
        let dispatcher = Dispatcher::new(create_test_context("forest"));
        let response = dispatcher.dispatch(json!({"method": "retrain"})).await;
        assert_eq!(response.status_code, 400);
        assert!(response.body["error"]
            .as_str()
            .unwrap()
            .contains("unknown method: retrain"));
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_client_error() {
        let dispatcher = Dispatcher::new(create_test_context("forest"));
        let response = dispatcher.dispatch(json!([1, 2, 3])).await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn test_infer_without_measurements_is_client_error() {
        let dispatcher = Dispatcher::new(create_test_context("forest"));
        let response = dispatcher.dispatch(json!({"method": "infer"})).await;
        assert_eq!(response.status_code, 400);
        assert!(response.body["error"]
            .as_str()
            .unwrap()
            .contains("facial_measurements"));
    }

    #[tokio::test]
    async fn test_warmup_before_any_training_is_server_error() {
        let dispatcher = Dispatcher::new(create_test_context("forest"));
        let response = dispatcher.dispatch(json!({"method": "warmup"})).await;
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn test_warmup_after_training_succeeds() {
        let dispatcher = trained_dispatcher().await;
        let response = dispatcher.dispatch(json!({"method": "warmup"})).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["backend"], "forest");
        assert_eq!(dispatcher.context().cache().len(), 1);
    }
}
