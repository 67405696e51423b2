//! Request envelope normalization.
//!
//! Callers reach the dispatcher through several transports, so the same
//! logical request arrives in several shapes: a direct JSON object, a
//! JSON-encoded string, or an HTTP-style wrapper with the real payload under
//! `body` (itself either shape). All of them funnel through
//! [`normalize_envelope`] into one typed form before any business logic
//! runs; anything unparseable is rejected there as an input error.

use serde_json::{Map, Value};

use maskfit_core::types::{json_i64, FacialMeasurementSet};

use crate::error::{ServiceError, ServiceResult};

/// Method assumed when the envelope names none.
pub const DEFAULT_METHOD: &str = "infer";

/// How many `body`/string layers may wrap the payload.
const MAX_ENVELOPE_DEPTH: u8 = 4;

/// A normalized request: the routing method plus the flattened payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub method: String,
    pub payload: Map<String, Value>,
}

/// Flatten a loose request into an [`Envelope`].
pub fn normalize_envelope(raw: Value) -> ServiceResult<Envelope> {
    let payload = unwrap_payload(raw, 0)?;
    let method = match payload.get("method") {
        None | Some(Value::Null) => DEFAULT_METHOD.to_string(),
        Some(Value::String(name)) => name.trim().to_lowercase(),
        Some(other) => {
            return Err(ServiceError::Input(format!(
                "method must be a string, got {}",
                type_name(other)
            )))
        }
    };
    Ok(Envelope { method, payload })
}

fn unwrap_payload(raw: Value, depth: u8) -> ServiceResult<Map<String, Value>> {
    if depth >= MAX_ENVELOPE_DEPTH {
        return Err(ServiceError::Input(
            "request envelope nested too deeply".into(),
        ));
    }
    match raw {
        Value::Object(mut outer) => match outer.remove("body") {
            Some(body) if !body.is_null() => {
                let mut inner = unwrap_payload(body, depth + 1)?;
                // A method on the wrapper still routes when the body has none.
                if !inner.contains_key("method") {
                    if let Some(method) = outer.remove("method") {
                        inner.insert("method".to_string(), method);
                    }
                }
                Ok(inner)
            }
            _ => Ok(outer),
        },
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(&text).map_err(|e| {
                ServiceError::Input(format!("request body is not valid JSON: {}", e))
            })?;
            unwrap_payload(parsed, depth + 1)
        }
        other => Err(ServiceError::Input(format!(
            "request envelope must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn optional_string(payload: &Map<String, Value>, key: &str) -> ServiceResult<Option<String>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ServiceError::Input(format!(
            "{} must be a string, got {}",
            key,
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed `train` request.
#[derive(Debug, Clone, Default)]
pub struct TrainRequest {
    pub data_url: Option<String>,
    pub epochs: Option<usize>,
    pub target_col: Option<String>,
}

impl TrainRequest {
    pub fn from_payload(payload: &Map<String, Value>) -> ServiceResult<Self> {
        let data_url = optional_string(payload, "data_url")?;
        let target_col = optional_string(payload, "target_col")?;
        let epochs = match payload.get("epochs") {
            None | Some(Value::Null) => None,
            Some(value) => match json_i64(value) {
                Some(n) if n > 0 => Some(n as usize),
                _ => {
                    return Err(ServiceError::Input(
                        "epochs must be a positive integer".into(),
                    ))
                }
            },
        };
        Ok(Self { data_url, epochs, target_col })
    }
}

/// Typed `infer` request.
#[derive(Debug, Clone)]
pub struct InferRequest {
    pub measurements: FacialMeasurementSet,
    /// `None` ranks the whole catalog; `Some` restricts to the listed masks.
    pub mask_ids: Option<Vec<i64>>,
}

impl InferRequest {
    pub fn from_payload(payload: &Map<String, Value>) -> ServiceResult<Self> {
        let raw = payload.get("facial_measurements").ok_or_else(|| {
            ServiceError::Input("missing required field: facial_measurements".into())
        })?;
        let map = raw.as_object().ok_or_else(|| {
            ServiceError::Input("facial_measurements must be an object".into())
        })?;

        let measurements = FacialMeasurementSet::from_json_map(map);
        if measurements.seal_total_mm().is_none() {
            let missing: Vec<&str> = [
                ("nose_mm", measurements.nose_mm),
                ("chin_mm", measurements.chin_mm),
                ("top_cheek_mm", measurements.top_cheek_mm),
                ("mid_cheek_mm", measurements.mid_cheek_mm),
            ]
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
            return Err(ServiceError::Input(format!(
                "facial_measurements is missing required dimensions: {}",
                missing.join(", ")
            )));
        }

        let mask_ids = match payload.get("mask_ids") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let id = json_i64(item).ok_or_else(|| {
                        ServiceError::Input(format!(
                            "mask_ids must contain integers, got {}",
                            type_name(item)
                        ))
                    })?;
                    ids.push(id);
                }
                Some(ids)
            }
            Some(other) => {
                return Err(ServiceError::Input(format!(
                    "mask_ids must be an array, got {}",
                    type_name(other)
                )))
            }
        };

        Ok(Self { measurements, mask_ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_object_with_method() {
        let envelope = normalize_envelope(json!({"method": "train", "epochs": 5})).unwrap();
        assert_eq!(envelope.method, "train");
        assert_eq!(envelope.payload.get("epochs"), Some(&json!(5)));
    }

    #[test]
    fn test_method_defaults_to_infer() {
        let envelope =
            normalize_envelope(json!({"facial_measurements": {"nose_mm": 52.0}})).unwrap();
        assert_eq!(envelope.method, DEFAULT_METHOD);
    }

    #[test]
    fn test_json_string_envelope() {
        let raw = json!(r#"{"method": "warmup"}"#);
        let envelope = normalize_envelope(raw).unwrap();
        assert_eq!(envelope.method, "warmup");
    }

    #[test]
    fn test_nested_body_object() {
        let envelope =
            normalize_envelope(json!({"body": {"method": "train", "epochs": 3}})).unwrap();
        assert_eq!(envelope.method, "train");
        assert_eq!(envelope.payload.get("epochs"), Some(&json!(3)));
    }

    #[test]
    fn test_nested_body_string() {
        let envelope =
            normalize_envelope(json!({"body": r#"{"method": "train"}"#})).unwrap();
        assert_eq!(envelope.method, "train");
    }

    #[test]
    fn test_outer_method_applies_when_body_has_none() {
        let envelope =
            normalize_envelope(json!({"method": "train", "body": {"epochs": 2}})).unwrap();
        assert_eq!(envelope.method, "train");
    }

    #[test]
    fn test_body_method_wins_over_outer() {
        let envelope = normalize_envelope(
            json!({"method": "train", "body": {"method": "warmup"}}),
        )
        .unwrap();
        assert_eq!(envelope.method, "warmup");
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let envelope = normalize_envelope(json!({"method": "TRAIN"})).unwrap();
        assert_eq!(envelope.method, "train");
    }

    #[test]
    fn test_invalid_json_string_rejected() {
        let err = normalize_envelope(json!("{not json")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_non_object_envelope_rejected() {
        let err = normalize_envelope(json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_runaway_nesting_rejected() {
        let raw = json!({"body": {"body": {"body": {"body": {"body": {}}}}}});
        let err = normalize_envelope(raw).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));
    }

    #[test]
    fn test_train_request_accepts_epoch_strings() {
        let Envelope { payload, .. } =
            normalize_envelope(json!({"method": "train", "epochs": "25"})).unwrap();
        let request = TrainRequest::from_payload(&payload).unwrap();
        assert_eq!(request.epochs, Some(25));
    }

    #[test]
    fn test_train_request_rejects_bad_epochs() {
        let Envelope { payload, .. } =
            normalize_envelope(json!({"method": "train", "epochs": -3})).unwrap();
        let err = TrainRequest::from_payload(&payload).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_infer_request_parses_measurements_and_ids() {
        let Envelope { payload, .. } = normalize_envelope(json!({
            "facial_measurements": {
                "nose_mm": 52.0,
                "chin_mm": 81.5,
                "top_cheek_mm": "96.0",
                "mid_cheek_mm": 74.0,
                "facial_hair_beard_length_mm": 4.0
            },
            "mask_ids": [3, "7", 11]
        }))
        .unwrap();
        let request = InferRequest::from_payload(&payload).unwrap();
        assert_eq!(request.measurements.top_cheek_mm, Some(96.0));
        assert_eq!(request.measurements.facial_hair_mm, Some(4.0));
        assert_eq!(request.mask_ids, Some(vec![3, 7, 11]));
    }

    #[test]
    fn test_infer_request_requires_measurements() {
        let Envelope { payload, .. } = normalize_envelope(json!({"mask_ids": [1]})).unwrap();
        let err = InferRequest::from_payload(&payload).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("facial_measurements"));
    }

    #[test]
    fn test_infer_request_names_missing_dimensions() {
        let Envelope { payload, .. } = normalize_envelope(json!({
            "facial_measurements": {"nose_mm": 52.0, "chin_mm": 80.0}
        }))
        .unwrap();
        let err = InferRequest::from_payload(&payload).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("top_cheek_mm"));
        assert!(message.contains("mid_cheek_mm"));
        assert!(!message.contains("nose_mm"));
    }

    #[test]
    fn test_infer_request_rejects_non_integer_mask_ids() {
        let Envelope { payload, .. } = normalize_envelope(json!({
            "facial_measurements": {
                "nose_mm": 52.0, "chin_mm": 80.0,
                "top_cheek_mm": 95.0, "mid_cheek_mm": 75.0
            },
            "mask_ids": [1, {"id": 2}]
        }))
        .unwrap();
        let err = InferRequest::from_payload(&payload).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_empty_mask_ids_is_preserved() {
        let Envelope { payload, .. } = normalize_envelope(json!({
            "facial_measurements": {
                "nose_mm": 52.0, "chin_mm": 80.0,
                "top_cheek_mm": 95.0, "mid_cheek_mm": 75.0
            },
            "mask_ids": []
        }))
        .unwrap();
        let request = InferRequest::from_payload(&payload).unwrap();
        assert_eq!(request.mask_ids, Some(Vec::new()));
    }
}
