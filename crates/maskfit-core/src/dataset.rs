//! Fit-test dataset ingestion.
//!
//! The upstream collector exports a JSON document whose record list hides
//! under one of several historical keys. Records are loosely typed; this
//! module is the single place that maps them onto [`FitTestObservation`]s so
//! training and catalog derivation cannot drift apart.

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::label;
use crate::types::{
    json_f64, json_i64, FacialMeasurementSet, FitTestObservation, MaskCatalogEntry,
    PerimeterSource,
};

/// Keys under which exports have shipped their record list, probed in order.
pub const RECORD_LIST_KEYS: [&str; 5] = [
    "fit_tests_with_facial_measurements",
    "data",
    "rows",
    "items",
    "records",
];

/// Preferred pass/fail field name; any other `*_pass` field is a fallback.
pub const PREFERRED_LABEL_FIELD: &str = "qlft_pass";

/// A parsed fit-test dataset.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    pub observations: Vec<FitTestObservation>,
}

impl DataSet {
    /// Observations carrying a recognized pass/fail label.
    #[must_use]
    pub fn labeled(&self) -> Vec<&FitTestObservation> {
        self.observations
            .iter()
            .filter(|obs| obs.label.is_some())
            .collect()
    }

    /// Derive the mask catalog from the observations: one entry per distinct
    /// `mask_id`, in first-seen order, taking the first non-missing value of
    /// each attribute. Perimeter provenance starts as `existing` when any
    /// record carried a value and `insufficient_data` otherwise; the
    /// perimeter imputer upgrades the latter.
    #[must_use]
    pub fn derive_catalog(&self) -> Vec<MaskCatalogEntry> {
        let mut order: Vec<i64> = Vec::new();
        let mut entries: std::collections::HashMap<i64, MaskCatalogEntry> =
            std::collections::HashMap::new();

        for obs in &self.observations {
            let entry = entries.entry(obs.mask_id).or_insert_with(|| {
                order.push(obs.mask_id);
                MaskCatalogEntry {
                    id: obs.mask_id,
                    model: String::new(),
                    style: obs.style,
                    strap_type: obs.strap_type,
                    perimeter_mm: None,
                    source_tag: PerimeterSource::InsufficientData,
                    details: None,
                }
            });

            if entry.model.is_empty() {
                if let Some(model) = &obs.model {
                    entry.model = model.clone();
                }
            }
            if entry.perimeter_mm.is_none() {
                if let Some(perimeter) = obs.perimeter_mm {
                    entry.perimeter_mm = Some(perimeter);
                    entry.source_tag = PerimeterSource::Existing;
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }
}

/// Load a data-source document from a `file://` URL or a bare path.
///
/// Remote HTTP fetching is deliberately unsupported; collection pipelines
/// stage their exports locally before training.
pub async fn load_data_url(data_url: &str) -> CoreResult<serde_json::Value> {
    if data_url.starts_with("http://") || data_url.starts_with("https://") {
        return Err(CoreError::DatasetError(
            "remote data URLs are not supported; pass a file:// URL or a local path".into(),
        ));
    }

    let path = data_url.strip_prefix("file://").unwrap_or(data_url);
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::DatasetError(format!("Failed to read data file {}: {}", path, e)))?;

    Ok(serde_json::from_str(&content)?)
}

/// Parse a data-source document into a [`DataSet`] using the default
/// pass/fail field preference.
pub fn parse_document(doc: &serde_json::Value) -> CoreResult<DataSet> {
    parse_document_with_label(doc, PREFERRED_LABEL_FIELD)
}

/// Parse a data-source document into a [`DataSet`].
///
/// The document may be a bare record array or an object holding the array
/// under one of [`RECORD_LIST_KEYS`]. Records missing a usable `mask_id`,
/// style, or strap type are skipped with a warning; records whose pass/fail
/// field does not normalize keep `label = None` and are excluded from
/// training downstream. `label_field` is probed first for the outcome;
/// any other `*_pass` field remains the fallback.
pub fn parse_document_with_label(
    doc: &serde_json::Value,
    label_field: &str,
) -> CoreResult<DataSet> {
    let records = find_record_list(doc)?;

    let mut observations = Vec::with_capacity(records.len());
    let mut skipped = 0usize;
    let mut unlabeled = 0usize;

    for (idx, record) in records.iter().enumerate() {
        let Some(map) = record.as_object() else {
            skipped += 1;
            continue;
        };

        let Some(mask_id) = map.get("mask_id").and_then(json_i64) else {
            warn!(record = idx, "skipping record without a mask_id");
            skipped += 1;
            continue;
        };

        let style_raw = string_field(map, &["style", "mask_style"]);
        let Some(style) = style_raw.as_deref().and_then(crate::types::MaskStyle::parse) else {
            warn!(record = idx, mask_id, style = ?style_raw, "skipping record with unrecognized style");
            skipped += 1;
            continue;
        };

        let strap_raw = string_field(map, &["strap_type", "strap"]);
        let Some(strap_type) = strap_raw.as_deref().and_then(crate::types::StrapType::parse)
        else {
            warn!(record = idx, mask_id, strap = ?strap_raw, "skipping record with unrecognized strap type");
            skipped += 1;
            continue;
        };

        let user_id = string_field(map, &["user_id", "subject_id"])
            .unwrap_or_else(|| format!("anon-{}", idx));

        let label_value = find_label_field(map, label_field);
        let label = label_value.and_then(label::normalize);
        if label.is_none() {
            unlabeled += 1;
        }

        observations.push(FitTestObservation {
            user_id,
            mask_id,
            label,
            measurements: FacialMeasurementSet::from_json_map(map),
            style,
            strap_type,
            perimeter_mm: read_perimeter(map),
            model: string_field(map, &["model", "mask_model", "mask_name"]),
        });
    }

    if observations.is_empty() {
        return Err(CoreError::DatasetError(
            "document contained no usable fit-test records".into(),
        ));
    }

    debug!(
        parsed = observations.len(),
        skipped, unlabeled, "parsed fit-test dataset"
    );
    if unlabeled > 0 {
        warn!(
            unlabeled,
            "records with unrecognizable pass/fail labels will be excluded from training"
        );
    }

    Ok(DataSet { observations })
}

fn find_record_list(doc: &serde_json::Value) -> CoreResult<&Vec<serde_json::Value>> {
    if let Some(records) = doc.as_array() {
        return Ok(records);
    }

    if let Some(map) = doc.as_object() {
        for key in RECORD_LIST_KEYS {
            if let Some(records) = map.get(key).and_then(serde_json::Value::as_array) {
                return Ok(records);
            }
        }
    }

    Err(CoreError::DatasetError(format!(
        "no record list found; expected an array or one of {:?}",
        RECORD_LIST_KEYS
    )))
}

fn find_label_field<'a>(
    map: &'a serde_json::Map<String, serde_json::Value>,
    preferred: &str,
) -> Option<&'a serde_json::Value> {
    if let Some(value) = map.get(preferred) {
        return Some(value);
    }
    map.iter()
        .find(|(key, _)| key.ends_with("_pass"))
        .map(|(_, value)| value)
}

fn string_field(
    map: &serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    for key in keys {
        if let Some(value) = map.get(*key) {
            match value {
                serde_json::Value::String(s) if !s.trim().is_empty() => {
                    return Some(s.trim().to_string())
                }
                serde_json::Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

fn read_perimeter(map: &serde_json::Map<String, serde_json::Value>) -> Option<f64> {
    for key in ["perimeter_mm", "perimeter"] {
        if let Some(value) = map.get(key).and_then(json_f64) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FitLabel, MaskStyle, StrapType};
    use serde_json::json;

    fn create_test_document() -> serde_json::Value {
        json!({
            "fit_tests_with_facial_measurements": [
                {
                    "user_id": "u1",
                    "mask_id": 10,
                    "style": "Cup",
                    "strap_type": "Headstrap",
                    "perimeter_mm": 300.0,
                    "model": "FM-100-M",
                    "nose_mm": 55.0,
                    "chin_mm": 80.0,
                    "top_cheek_mm": 95.0,
                    "mid_cheek_mm": 75.0,
                    "strap_mm": 320.0,
                    "qlft_pass": "PASS"
                },
                {
                    "user_id": "u2",
                    "mask_id": 10,
                    "style": "Cup",
                    "strap_type": "Headstrap",
                    "nose_mm": 52.0,
                    "qlft_pass": false
                },
                {
                    "user_id": "u3",
                    "mask_id": 11,
                    "style": "bifold + gasket",
                    "strap_type": "adjustable_earloop",
                    "fit_factor_pass": 1,
                    "nose_mm": 50.0
                },
                {
                    "user_id": "u4",
                    "mask_id": 12,
                    "style": "Boat",
                    "strap_type": "Earloop",
                    "qlft_pass": "maybe"
                }
            ]
        })
    }

    #[test]
    fn test_parse_document_under_known_key() {
        let ds = parse_document(&create_test_document()).unwrap();
        assert_eq!(ds.observations.len(), 4);
        assert_eq!(ds.observations[0].label, Some(FitLabel::Pass));
        assert_eq!(ds.observations[1].label, Some(FitLabel::Fail));
        assert_eq!(ds.observations[2].label, Some(FitLabel::Pass));
        assert_eq!(ds.observations[3].label, None);
    }

    #[test]
    fn test_parse_bare_array() {
        let doc = json!([
            { "user_id": "u1", "mask_id": 1, "style": "Cup", "strap_type": "Earloop", "qlft_pass": 1 }
        ]);
        let ds = parse_document(&doc).unwrap();
        assert_eq!(ds.observations.len(), 1);
    }

    #[test]
    fn test_parse_alternate_list_keys() {
        for key in ["data", "rows", "items", "records"] {
            let doc = json!({
                key: [
                    { "user_id": "u1", "mask_id": 1, "style": "Cup", "strap_type": "Earloop", "qlft_pass": 1 }
                ]
            });
            let ds = parse_document(&doc).unwrap();
            assert_eq!(ds.observations.len(), 1, "key {} must be probed", key);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_shape() {
        let doc = json!({ "payload": [] });
        assert!(parse_document(&doc).is_err());
    }

    #[test]
    fn test_records_without_mask_id_are_skipped() {
        let doc = json!([
            { "user_id": "u1", "style": "Cup", "strap_type": "Earloop", "qlft_pass": 1 },
            { "user_id": "u2", "mask_id": 2, "style": "Cup", "strap_type": "Earloop", "qlft_pass": 1 }
        ]);
        let ds = parse_document(&doc).unwrap();
        assert_eq!(ds.observations.len(), 1);
        assert_eq!(ds.observations[0].mask_id, 2);
    }

    #[test]
    fn test_fallback_pass_field_detection() {
        let ds = parse_document(&create_test_document()).unwrap();
        let obs = &ds.observations[2];
        assert_eq!(obs.label, Some(FitLabel::Pass));
        assert_eq!(obs.style, MaskStyle::BifoldGasket);
        assert_eq!(obs.strap_type, StrapType::AdjustableEarloop);
    }

    #[test]
    fn test_labeled_filters_unknown() {
        let ds = parse_document(&create_test_document()).unwrap();
        assert_eq!(ds.labeled().len(), 3);
    }

    #[test]
    fn test_derive_catalog_first_seen_order_and_attributes() {
        let ds = parse_document(&create_test_document()).unwrap();
        let catalog = ds.derive_catalog();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[0].id, 10);
        assert_eq!(catalog[0].model, "FM-100-M");
        assert_eq!(catalog[0].perimeter_mm, Some(300.0));
        assert_eq!(catalog[0].source_tag, PerimeterSource::Existing);

        assert_eq!(catalog[1].id, 11);
        assert_eq!(catalog[1].perimeter_mm, None);
        assert_eq!(catalog[1].source_tag, PerimeterSource::InsufficientData);
    }

    #[test]
    fn test_label_field_override() {
        let doc = json!([
            { "user_id": "u1", "mask_id": 1, "style": "Cup", "strap_type": "Earloop",
              "qlft_pass": false, "supervisor_check": true }
        ]);
        let ds = parse_document_with_label(&doc, "supervisor_check").unwrap();
        assert_eq!(ds.observations[0].label, Some(FitLabel::Pass));

        let default = parse_document(&doc).unwrap();
        assert_eq!(default.observations[0].label, Some(FitLabel::Fail));
    }

    #[test]
    fn test_missing_user_id_is_synthesized() {
        let doc = json!([
            { "mask_id": 1, "style": "Cup", "strap_type": "Earloop", "qlft_pass": 1 }
        ]);
        let ds = parse_document(&doc).unwrap();
        assert_eq!(ds.observations[0].user_id, "anon-0");
    }

    #[tokio::test]
    async fn test_load_data_url_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(&path, create_test_document().to_string()).unwrap();

        let doc = load_data_url(&format!("file://{}", path.display()))
            .await
            .unwrap();
        let ds = parse_document(&doc).unwrap();
        assert_eq!(ds.observations.len(), 4);

        let doc = load_data_url(path.to_str().unwrap()).await.unwrap();
        assert!(parse_document(&doc).is_ok());
    }

    #[tokio::test]
    async fn test_load_data_url_rejects_http() {
        let err = load_data_url("https://example.com/export.json")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[tokio::test]
    async fn test_load_data_url_missing_file() {
        let err = load_data_url("/nonexistent/export.json").await.unwrap_err();
        assert!(matches!(err, CoreError::DatasetError(_)));
    }
}
